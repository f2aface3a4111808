use crate::context::Context;
use crate::filter_chain::Filter;
use crate::notice::Notice;
use crate::value::Value;

/// Key under `params` that receives the application context.
pub const CONTEXT_PARAM: &str = "app_context";

/// Moves the accumulated [`Context`] into `params.app_context` and clears it.
#[derive(Debug, Clone)]
pub struct ContextFilter {
    context: Context,
}

impl ContextFilter {
    pub const WEIGHT: i32 = 119;

    pub fn new(context: Context) -> Self {
        Self { context }
    }
}

impl Filter for ContextFilter {
    fn weight(&self) -> Option<i32> {
        Some(Self::WEIGHT)
    }

    fn name(&self) -> &str {
        "context"
    }

    fn call(&self, notice: &mut Notice) -> anyhow::Result<()> {
        let values = self.context.take();
        if values.is_empty() {
            return Ok(());
        }
        notice
            .section("params")?
            .lock()
            .insert(CONTEXT_PARAM.to_string(), Value::map(values));
        Ok(())
    }
}
