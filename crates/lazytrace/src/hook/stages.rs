//! Transform stages plugged into the load interceptor.

use super::Transform;
use crate::instrument::Instrumenter;
use crate::result::TraceResult;
use crate::trace::TraceContext;
use std::path::Path;
use tracing::debug;

/// Instruments a unit and registers it with the run's trace context
#[derive(Debug, Clone)]
pub struct InstrumentStage {
    instrumenter: Instrumenter,
    context: TraceContext,
}

impl InstrumentStage {
    /// Create a stage writing to `context`
    #[must_use]
    pub fn new(instrumenter: Instrumenter, context: TraceContext) -> Self {
        Self {
            instrumenter,
            context,
        }
    }

    /// Stage bound to the context's own global counter table
    #[must_use]
    pub fn for_context(context: &TraceContext) -> Self {
        let config = crate::instrument::InstrumentConfig::new(context.global_name());
        Self::new(Instrumenter::new(config), context.clone())
    }
}

impl Transform for InstrumentStage {
    fn transform(&self, source: &str, path: &Path) -> TraceResult<String> {
        let unit = self.instrumenter.instrument(source, path)?;
        debug!(
            path = %path.display(),
            probes = unit.probe_table.len(),
            "Instrumented unit"
        );
        self.context.register_unit(&unit);
        Ok(unit.instrumented_text)
    }
}

impl<F> Transform for F
where
    F: Fn(&str, &Path) -> TraceResult<String>,
{
    fn transform(&self, source: &str, path: &Path) -> TraceResult<String> {
        self(source, path)
    }
}
