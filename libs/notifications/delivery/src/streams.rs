//! Email stream definition.

use stream_worker::StreamDef;

/// Redis Streams configuration for the email job stream.
///
/// Producers and workers derive stream, group, and delayed-set names
/// from this one definition so they can never drift apart.
pub struct EmailStream;

impl StreamDef for EmailStream {
    const STREAM_NAME: &'static str = "email:jobs";
    const CONSUMER_GROUP: &'static str = "email_workers";
    const DELAYED_SET: &'static str = "email:jobs:delayed";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_names() {
        assert_eq!(EmailStream::stream_name(), "email:jobs");
        assert_eq!(EmailStream::consumer_group(), "email_workers");
        assert_eq!(EmailStream::delayed_set(), "email:jobs:delayed");
    }
}
