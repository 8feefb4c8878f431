use ragchat_store::BoxedSource;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("failed to open stream on `{stage}`: {source}"))]
    Open {
        stage: &'static str,
        source: BoxedSource,
    },
    #[snafu(display("stream endpoint returned status {status} on `{stage}`: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("stream read failed on `{stage}`: {source}"))]
    Read {
        stage: &'static str,
        source: BoxedSource,
    },
    #[snafu(display("stream line is not valid utf-8 on `{stage}`: {source}"))]
    Utf8 {
        stage: &'static str,
        source: std::string::FromUtf8Error,
    },
    #[snafu(display("failed to decode stream frame `{payload}` on `{stage}`, {source}"))]
    Decode {
        stage: &'static str,
        payload: String,
        source: serde_json::Error,
    },
}

pub type TransportResult<T> = Result<T, TransportError>;
