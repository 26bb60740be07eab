//! Encoder crash recovery hooks
//!
//! When an encoder faults while processing a buffer, the pump asks the
//! installed hook whether to rebuild it. Without a hook, recovery always
//! proceeds. A rebuild keeps the session's presentation-time baseline, so
//! timestamps continue where they left off.

use super::traits::EncoderFault;
use std::sync::Arc;

pub trait EncoderErrorHook: Send + Sync {
    /// Asynchronous error reported by the encoder itself; notification only
    fn on_codec_error(&self, tag: &str, fault: &EncoderFault) {
        let _ = (tag, fault);
    }

    /// A buffer-processing fault; return false to veto the rebuild
    fn on_encode_error(&self, tag: &str, fault: &EncoderFault) -> bool {
        let _ = (tag, fault);
        true
    }
}

/// Hook that always lets recovery proceed
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRecover;

impl EncoderErrorHook for AlwaysRecover {}

impl<F> EncoderErrorHook for F
where
    F: Fn(&str, &EncoderFault) -> bool + Send + Sync,
{
    fn on_encode_error(&self, tag: &str, fault: &EncoderFault) -> bool {
        self(tag, fault)
    }
}

pub(crate) fn should_recover(
    hook: Option<&Arc<dyn EncoderErrorHook>>,
    tag: &str,
    fault: &EncoderFault,
) -> bool {
    hook.map_or(true, |hook| hook.on_encode_error(tag, fault))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_recover() {
        let fault = anyhow::anyhow!("codec died");
        assert!(should_recover(None, "video", &fault));

        let hook: Arc<dyn EncoderErrorHook> = Arc::new(AlwaysRecover);
        assert!(should_recover(Some(&hook), "video", &fault));
    }

    #[test]
    fn test_closure_can_veto() {
        let fault = anyhow::anyhow!("codec died");
        let hook: Arc<dyn EncoderErrorHook> = Arc::new(|tag: &str, _: &EncoderFault| tag != "audio");
        assert!(!should_recover(Some(&hook), "audio", &fault));
        assert!(should_recover(Some(&hook), "video", &fault));
    }
}
