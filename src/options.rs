/// How to treat a WIN_CERTIFICATE whose `wRevision` is not the one the
/// structure requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevisionPolicy {
    /// Log the mismatch and keep decoding, as firmware and most tooling do.
    #[default]
    Warn,
    /// Reject the structure with [`crate::Error::UnexpectedRevision`].
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeOptions {
    pub revision_policy: RevisionPolicy,
}

impl DecodeOptions {
    pub const fn new() -> DecodeOptions {
        DecodeOptions {
            revision_policy: RevisionPolicy::Warn,
        }
    }

    pub const fn strict() -> DecodeOptions {
        DecodeOptions {
            revision_policy: RevisionPolicy::Strict,
        }
    }

    pub const fn with_revision_policy(mut self, policy: RevisionPolicy) -> DecodeOptions {
        self.revision_policy = policy;
        self
    }
}
