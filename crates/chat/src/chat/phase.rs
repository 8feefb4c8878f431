use std::fmt;

use ragchat_store::SessionId;

/// Identifier for one send/stream cycle.
///
/// Minted fresh for every send so chunks from an abandoned stream can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl StreamId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Routing key every stream update is checked against before it touches the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub session_id: SessionId,
    pub stream_id: StreamId,
}

impl StreamTarget {
    pub fn new(session_id: SessionId, stream_id: StreamId) -> Self {
        Self {
            session_id,
            stream_id,
        }
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}#{}", self.session_id, self.stream_id.0)
    }
}

/// Lifecycle of one send operation.
///
/// `Idle -> Sending -> Streaming -> Reconciling -> Idle` on success,
/// `Idle -> Sending -> Streaming -> Failed -> Idle` on error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    Sending(StreamTarget),
    Streaming(StreamTarget),
    Reconciling(StreamTarget),
    Failed {
        target: StreamTarget,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    /// Optimistic message appended, transport being opened.
    Open(StreamTarget),
    /// The transport yielded its first item.
    FirstChunk(StreamTarget),
    /// Terminal `end` chunk consumed.
    End(StreamTarget),
    Fail {
        target: StreamTarget,
        message: String,
    },
    /// Reconciliation or failure handling finished.
    Settle(StreamTarget),
    /// The owner navigated away; the stream is logically cancelled.
    Abandon(StreamTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionRejection {
    AlreadyStreaming {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveStream,
    TargetMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    InvalidFrom {
        phase: &'static str,
        transition: &'static str,
    },
}

pub type TransitionResult = Result<StreamPhase, TransitionRejection>;

impl StreamTransition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open(_) => "open",
            Self::FirstChunk(_) => "first-chunk",
            Self::End(_) => "end",
            Self::Fail { .. } => "fail",
            Self::Settle(_) => "settle",
            Self::Abandon(_) => "abandon",
        }
    }

    fn target(&self) -> &StreamTarget {
        match self {
            Self::Open(target)
            | Self::FirstChunk(target)
            | Self::End(target)
            | Self::Settle(target)
            | Self::Abandon(target)
            | Self::Fail { target, .. } => target,
        }
    }
}

impl StreamPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sending(_) => "sending",
            Self::Streaming(_) => "streaming",
            Self::Reconciling(_) => "reconciling",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Target of the stream this phase belongs to, if any.
    pub fn target(&self) -> Option<&StreamTarget> {
        match self {
            Self::Idle => None,
            Self::Sending(target)
            | Self::Streaming(target)
            | Self::Reconciling(target)
            | Self::Failed { target, .. } => Some(target),
        }
    }

    /// True while a send occupies the session and a new one must be refused.
    pub fn blocks_send(&self) -> bool {
        matches!(
            self,
            Self::Sending(_) | Self::Streaming(_) | Self::Reconciling(_)
        )
    }

    /// True when a chunk for `target` may still be applied.
    pub fn accepts_chunk(&self, target: &StreamTarget) -> bool {
        matches!(self, Self::Sending(active) | Self::Streaming(active) if active == target)
    }

    pub fn apply(&self, transition: StreamTransition) -> TransitionResult {
        if let StreamTransition::Open(target) = &transition {
            return match self {
                Self::Idle | Self::Failed { .. } => Ok(Self::Sending(target.clone())),
                Self::Sending(active) | Self::Streaming(active) | Self::Reconciling(active) => {
                    Err(TransitionRejection::AlreadyStreaming {
                        active: active.clone(),
                        attempted: target.clone(),
                    })
                }
            };
        }

        let Some(active) = self.target() else {
            return Err(TransitionRejection::NoActiveStream);
        };
        let attempted = transition.target();
        if active != attempted {
            return Err(TransitionRejection::TargetMismatch {
                active: active.clone(),
                attempted: attempted.clone(),
            });
        }

        let invalid = TransitionRejection::InvalidFrom {
            phase: self.name(),
            transition: transition.name(),
        };
        match (self, transition) {
            (Self::Sending(_), StreamTransition::FirstChunk(target)) => {
                Ok(Self::Streaming(target))
            }
            (Self::Streaming(_), StreamTransition::FirstChunk(_)) => Ok(self.clone()),
            (Self::Streaming(_), StreamTransition::End(target)) => Ok(Self::Reconciling(target)),
            (
                Self::Sending(_) | Self::Streaming(_),
                StreamTransition::Fail { target, message },
            ) => Ok(Self::Failed { target, message }),
            (Self::Reconciling(_) | Self::Failed { .. }, StreamTransition::Settle(_)) => {
                Ok(Self::Idle)
            }
            (_, StreamTransition::Abandon(_)) => Ok(Self::Idle),
            _ => Err(invalid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(session: &str, stream: u64) -> StreamTarget {
        StreamTarget::new(SessionId::new(session), StreamId::new(stream))
    }

    fn run(phase: StreamPhase, transitions: Vec<StreamTransition>) -> TransitionResult {
        transitions
            .into_iter()
            .try_fold(phase, |phase, transition| phase.apply(transition))
    }

    #[test]
    fn success_path_walks_every_phase() {
        let t = target("s1", 1);
        let mut phase = StreamPhase::Idle;
        let mut seen = vec![phase.name()];
        for transition in [
            StreamTransition::Open(t.clone()),
            StreamTransition::FirstChunk(t.clone()),
            StreamTransition::FirstChunk(t.clone()),
            StreamTransition::End(t.clone()),
            StreamTransition::Settle(t.clone()),
        ] {
            phase = phase.apply(transition).unwrap();
            seen.push(phase.name());
        }

        assert_eq!(
            seen,
            vec![
                "idle",
                "sending",
                "streaming",
                "streaming",
                "reconciling",
                "idle"
            ]
        );
    }

    #[test]
    fn failure_path_settles_back_to_idle_and_allows_resend() {
        let t = target("s1", 1);
        let failed = run(
            StreamPhase::Idle,
            vec![
                StreamTransition::Open(t.clone()),
                StreamTransition::Fail {
                    target: t.clone(),
                    message: "unauthorized".into(),
                },
            ],
        )
        .unwrap();
        assert_eq!(failed.name(), "failed");
        assert!(!failed.blocks_send());

        let settled = failed.apply(StreamTransition::Settle(t)).unwrap();
        assert!(settled.is_idle());
        assert!(
            settled
                .apply(StreamTransition::Open(target("s1", 2)))
                .is_ok()
        );
    }

    #[test]
    fn second_open_is_rejected_while_busy() {
        let busy = StreamPhase::Streaming(target("s1", 1));
        assert!(matches!(
            busy.apply(StreamTransition::Open(target("s1", 2))),
            Err(TransitionRejection::AlreadyStreaming { .. })
        ));
    }

    #[test]
    fn stale_targets_are_rejected() {
        let phase = StreamPhase::Streaming(target("s2", 5));
        assert!(!phase.accepts_chunk(&target("s1", 4)));
        assert!(matches!(
            phase.apply(StreamTransition::End(target("s1", 4))),
            Err(TransitionRejection::TargetMismatch { .. })
        ));
        assert_eq!(
            StreamPhase::Idle.apply(StreamTransition::End(target("s1", 4))),
            Err(TransitionRejection::NoActiveStream)
        );
    }

    #[test]
    fn end_before_first_chunk_is_invalid() {
        let t = target("s1", 1);
        assert_eq!(
            StreamPhase::Sending(t.clone()).apply(StreamTransition::End(t)),
            Err(TransitionRejection::InvalidFrom {
                phase: "sending",
                transition: "end",
            })
        );
    }
}
