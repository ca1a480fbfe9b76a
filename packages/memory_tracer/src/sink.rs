//! Destinations for the messages the tracer produces.

/// Receives the fully formatted messages produced by the tracer.
///
/// Any `FnMut(&str)` closure is a sink.
///
/// # Examples
///
/// ```
/// use memory_tracer::TracerConfig;
///
/// let config = TracerConfig::new().sink(|message: &str| eprintln!("{message}"));
/// ```
pub trait ReportSink {
    /// Handles one message. A message may span multiple lines.
    fn emit(&mut self, message: &str);
}

impl<F> ReportSink for F
where
    F: FnMut(&str),
{
    fn emit(&mut self, message: &str) {
        self(message);
    }
}

/// Emits each message as a `tracing` event at INFO level with the `memory_tracer` target.
///
/// This is the default sink.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    #[cfg_attr(test, mutants::skip)] // Too difficult to test subscriber output reliably - manually tested.
    fn emit(&mut self, message: &str) {
        tracing::info!(target: "memory_tracer", "{message}");
    }
}
