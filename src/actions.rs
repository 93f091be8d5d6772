//! Resolving how many actions a context offers.

use serde_json::Value;

use crate::error::{LiveModelError, Result};

/// Key of the action array in a JSON context.
pub const MULTI_KEY: &str = "_multi";

/// Determines the number of candidate actions described by a context.
pub trait ActionCountResolver: Send + Sync {
    fn action_count(&self, context: &str) -> Result<usize>;
}

/// Counts the elements of the top-level `_multi` array of a JSON context.
#[derive(Debug, Default, Clone, Copy)]
pub struct MultiActionResolver;

impl ActionCountResolver for MultiActionResolver {
    fn action_count(&self, context: &str) -> Result<usize> {
        let parsed: Value = serde_json::from_str(context)
            .map_err(|e| LiveModelError::InvalidArgument(format!("context is not valid json: {e}")))?;

        let count = parsed
            .get(MULTI_KEY)
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);

        if count == 0 {
            return Err(LiveModelError::InvalidArgument(format!(
                "context must contain at least one action in `{MULTI_KEY}`"
            )));
        }
        Ok(count)
    }
}

impl<F> ActionCountResolver for F
where
    F: Fn(&str) -> Result<usize> + Send + Sync,
{
    fn action_count(&self, context: &str) -> Result<usize> {
        self(context)
    }
}
