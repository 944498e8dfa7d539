use tracing::{debug, warn};

use crate::value::FlowValue;

use super::{FieldPath, RuleSet};

/// What one pass of [`FieldTransformer::apply`] did to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformSummary {
    /// Fields rewritten in place.
    pub changed: usize,
    /// Fields left untouched because their value did not fit the rule.
    pub skipped: Vec<FieldPath>,
}

pub struct FieldTransformer;

impl FieldTransformer {
    pub fn new() -> Self {
        Self
    }

    /// Applies every rule of `rules` to `record` in place.
    ///
    /// A path whose steps are missing, falsy or not mappings is ignored.
    /// A value that is present but shaped wrongly for its rule is logged and
    /// kept as is; the remaining paths are still rewritten.
    pub fn apply(&self, record: &mut FlowValue, rules: &RuleSet) -> TransformSummary {
        let mut summary = TransformSummary::default();

        for rule in rules.rules() {
            for path in &rule.paths {
                let Some(slot) = Self::locate(record, path) else {
                    continue;
                };

                match rule.kind.rewrite(slot) {
                    Ok(rewritten) => {
                        *slot = rewritten;
                        summary.changed += 1;
                    }
                    Err(err) => {
                        warn!(
                            path = %path,
                            rule = rule.kind.name(),
                            error = %err,
                            "leaving field untransformed"
                        );
                        summary.skipped.push(path.clone());
                    }
                }
            }
        }

        if summary.changed > 0 {
            debug!(
                changes = summary.changed,
                skipped = summary.skipped.len(),
                "applied field transformations to record"
            );
        }

        summary
    }

    fn locate<'a>(record: &'a mut FlowValue, path: &FieldPath) -> Option<&'a mut FlowValue> {
        let (last, parents) = path.keys().split_last()?;

        let mut current = record;
        for key in parents {
            let next = current.as_map_mut()?.get_mut(key.as_str())?;
            if !next.is_truthy() {
                return None;
            }
            current = next;
        }

        let slot = current.as_map_mut()?.get_mut(last.as_str())?;
        if slot.is_truthy() {
            Some(slot)
        } else {
            None
        }
    }
}

impl Default for FieldTransformer {
    fn default() -> Self {
        Self::new()
    }
}
