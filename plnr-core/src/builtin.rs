use crate::component::{Assertion, PreProcessor, Timer};
use crate::element::Element;
use crate::error::StageError;
use crate::result::{AssertionResult, SampleResult};
use crate::thread::ThreadContext;

/// Fixed pause read from the element's `delay` property (milliseconds).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantTimer;

impl ConstantTimer {
    pub const DELAY: &'static str = "delay";
}

impl Timer for ConstantTimer {
    fn delay(&self, element: &Element, _ctx: &ThreadContext) -> i64 {
        element.property_i64(Self::DELAY).unwrap_or(0)
    }
}

/// Fails samples that took longer than `max_duration_ms`. A missing or non-positive limit passes
/// everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DurationAssertion;

impl DurationAssertion {
    pub const MAX_DURATION_MS: &'static str = "max_duration_ms";
}

impl Assertion for DurationAssertion {
    fn evaluate(
        &self,
        element: &Element,
        result: &SampleResult,
        _ctx: &ThreadContext,
    ) -> AssertionResult {
        let limit = match element.property_i64(Self::MAX_DURATION_MS) {
            Some(ms) if ms > 0 => ms.unsigned_abs(),
            _ => return AssertionResult::pass(element.name_arc()),
        };

        let took = u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX);
        if took > limit {
            AssertionResult::failure(
                element.name_arc(),
                format!("sample took {took} ms, longer than {limit} ms"),
            )
        } else {
            AssertionResult::pass(element.name_arc())
        }
    }
}

/// Copies every property of its element into thread variables before the sampler runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserParameters;

impl PreProcessor for UserParameters {
    fn process(&self, element: &Element, ctx: &mut ThreadContext) -> Result<(), StageError> {
        for (key, value) in element.properties().snapshot() {
            ctx.vars.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }
}
