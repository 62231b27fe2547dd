//! MergeRows: compares a reference stream with a compare stream.
//!
//! Both inputs must be sorted ascending on the key fields. Every output row
//! carries a flag field telling whether the key was `identical`, `changed`,
//! `new` (only in compare) or `deleted` (only in reference).

use std::cmp::Ordering;
use std::sync::Arc;

use rowflow_core::{FieldMeta, Row, Schema, Value, ValueType};
use rowflow_plan::StepMeta;
use rowflow_runtime::{ProcessOutcome, RowSet, Step, StepContext, StepError};
use serde::{Deserialize, Serialize};

/// Legacy toggle: when true, identical rows are taken from the reference stream
pub const USE_REFERENCE_WHEN_IDENTICAL: &str =
    "ROWFLOW_COMPATIBILITY_MERGE_ROWS_USE_REFERENCE_STREAM_WHEN_IDENTICAL";

/// Flag of rows present in both streams with equal values
pub const FLAG_IDENTICAL: &str = "identical";
/// Flag of rows present in both streams with different values
pub const FLAG_CHANGED: &str = "changed";
/// Flag of rows only in the compare stream
pub const FLAG_NEW: &str = "new";
/// Flag of rows only in the reference stream
pub const FLAG_DELETED: &str = "deleted";

/// Stream that supplies `identical` rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdenticalSource {
    /// Reference stream
    Reference,
    /// Compare stream
    Compare,
}

/// MergeRows settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeRowsMeta {
    /// Step feeding the reference stream
    pub reference_step: String,
    /// Step feeding the compare stream
    pub compare_step: String,
    /// Name of the appended flag field
    pub flag_field: String,
    /// Key fields, compared in order
    pub keys: Vec<String>,
    /// Value fields compared when keys match
    pub values: Vec<String>,
    /// Source of identical rows; falls back to the legacy toggle variable
    pub identical_source: Option<IdenticalSource>,
}

impl Default for MergeRowsMeta {
    fn default() -> Self {
        Self {
            reference_step: String::new(),
            compare_step: String::new(),
            flag_field: "flagfield".to_string(),
            keys: Vec::new(),
            values: Vec::new(),
            identical_source: None,
        }
    }
}

/// Field positions resolved against one stream's schema
#[derive(Debug)]
struct Stream {
    row_set: Arc<RowSet>,
    schema: Option<Arc<Schema>>,
    output: Option<Arc<Schema>>,
    keys: Vec<usize>,
    values: Vec<usize>,
    current: Option<Row>,
}

impl Stream {
    fn new(row_set: Arc<RowSet>) -> Self {
        Self {
            row_set,
            schema: None,
            output: None,
            keys: Vec::new(),
            values: Vec::new(),
            current: None,
        }
    }

    fn advance(&mut self, ctx: &mut StepContext, meta: &MergeRowsMeta) -> Result<(), StepError> {
        self.current = match ctx.get_row_from(&self.row_set) {
            Some((schema, row)) => {
                if self.schema.is_none() {
                    self.resolve(ctx, meta, &schema)?;
                }
                Some(row)
            }
            None => None,
        };
        Ok(())
    }

    fn resolve(
        &mut self,
        ctx: &StepContext,
        meta: &MergeRowsMeta,
        schema: &Arc<Schema>,
    ) -> Result<(), StepError> {
        let lookup = |names: &[String], what: &str| -> Result<Vec<usize>, StepError> {
            names
                .iter()
                .map(|name| {
                    schema.index_of(name).ok_or_else(|| {
                        StepError::config(
                            ctx.step_name(),
                            format!(
                                "{what} field '{name}' not found in rows from {}",
                                self.row_set.origin().step
                            ),
                        )
                    })
                })
                .collect()
        };
        let keys = lookup(&meta.keys, "key")?;
        let values = lookup(&meta.values, "value")?;
        let output = schema.appended(FieldMeta::new(meta.flag_field.clone(), ValueType::String))?;

        tracing::debug!(
            stream = %self.row_set.origin().step,
            keys = ?keys,
            values = ?values,
            "resolved merge fields"
        );
        self.keys = keys;
        self.values = values;
        self.output = Some(Arc::new(output));
        self.schema = Some(Arc::clone(schema));
        Ok(())
    }
}

fn compare_fields(left: &Row, left_idx: &[usize], right: &Row, right_idx: &[usize]) -> Ordering {
    for (&l, &r) in left_idx.iter().zip(right_idx) {
        let ordering = match (left.get(l), right.get(r)) {
            (Some(a), Some(b)) => a.compare(b),
            (a, b) => a.is_some().cmp(&b.is_some()),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// MergeRows step
pub struct MergeRows {
    meta: MergeRowsMeta,
    identical: IdenticalSource,
    reference: Option<Stream>,
    compare: Option<Stream>,
    started: bool,
}

impl MergeRows {
    /// Build from a step definition
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be decoded or name no key
    pub fn new(step: &StepMeta) -> Result<Self, StepError> {
        let meta: MergeRowsMeta = step.config_as()?;
        if meta.keys.is_empty() {
            return Err(StepError::config(&step.name, "at least one key field is required"));
        }
        if meta.flag_field.trim().is_empty() {
            return Err(StepError::config(&step.name, "flag field name is required"));
        }
        Ok(Self {
            identical: meta.identical_source.unwrap_or(IdenticalSource::Compare),
            meta,
            reference: None,
            compare: None,
            started: false,
        })
    }

    fn emit(ctx: &mut StepContext, stream: &mut Stream, flag: &str) -> Result<(), StepError> {
        let (Some(mut row), Some(output)) = (stream.current.take(), stream.output.clone()) else {
            return Ok(());
        };
        let index = output.len() - 1;
        row.grow_to(output.len());
        row.set(index, Value::from(flag));
        ctx.put_row(&output, row)
    }

    fn check_compatible(&self, ctx: &StepContext) -> Result<(), StepError> {
        let (Some(reference), Some(compare)) = (&self.reference, &self.compare) else {
            return Ok(());
        };
        match (&reference.schema, &compare.schema) {
            (Some(r), Some(c)) if !r.is_compatible_with(c) => Err(StepError::config(
                ctx.step_name(),
                format!(
                    "reference [{}] and compare [{}] rows have different layouts",
                    r.field_names().join(", "),
                    c.field_names().join(", ")
                ),
            )),
            _ => Ok(()),
        }
    }
}

impl Step for MergeRows {
    fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let find = |step: &str, role: &str| {
            if step.trim().is_empty() {
                return Err(StepError::config(ctx.step_name(), format!("{role} step is not set")));
            }
            let feeding = ctx
                .input_row_sets()
                .iter()
                .filter(|rs| rs.origin().step == step)
                .count();
            match (feeding, ctx.find_input_row_set(step)) {
                (1, Some(row_set)) => Ok(row_set),
                (0, _) | (_, None) => Err(StepError::config(
                    ctx.step_name(),
                    format!("{role} step '{step}' is not an input of this step"),
                )),
                (n, _) => Err(StepError::config(
                    ctx.step_name(),
                    format!(
                        "{role} step '{step}' feeds this copy through {n} row sets, expected one"
                    ),
                )),
            }
        };
        let reference = find(&self.meta.reference_step, "reference")?;
        let compare = find(&self.meta.compare_step, "compare")?;
        if Arc::ptr_eq(&reference, &compare) {
            return Err(StepError::config(
                ctx.step_name(),
                "reference and compare must be different steps",
            ));
        }

        if self.meta.identical_source.is_none()
            && ctx.variables().get_boolean(USE_REFERENCE_WHEN_IDENTICAL, false)
        {
            self.identical = IdenticalSource::Reference;
        }

        tracing::debug!(identical_source = ?self.identical, "merge streams located");
        self.reference = Some(Stream::new(reference));
        self.compare = Some(Stream::new(compare));
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> Result<ProcessOutcome, StepError> {
        let (Some(reference), Some(compare)) = (self.reference.as_mut(), self.compare.as_mut())
        else {
            return Err(StepError::process(ctx.step_name(), "step was not initialized"));
        };

        if !self.started {
            reference.advance(ctx, &self.meta)?;
            compare.advance(ctx, &self.meta)?;
            self.started = true;
            if ctx.is_stopped() {
                return Ok(ProcessOutcome::Done);
            }
            self.check_compatible(ctx)?;
        }

        let (Some(reference), Some(compare)) = (self.reference.as_mut(), self.compare.as_mut())
        else {
            return Ok(ProcessOutcome::Done);
        };

        match (&reference.current, &compare.current) {
            (None, None) => return Ok(ProcessOutcome::Done),
            (None, Some(_)) => {
                Self::emit(ctx, compare, FLAG_NEW)?;
                compare.advance(ctx, &self.meta)?;
            }
            (Some(_), None) => {
                Self::emit(ctx, reference, FLAG_DELETED)?;
                reference.advance(ctx, &self.meta)?;
            }
            (Some(r), Some(c)) => match compare_fields(r, &reference.keys, c, &compare.keys) {
                Ordering::Less => {
                    Self::emit(ctx, reference, FLAG_DELETED)?;
                    reference.advance(ctx, &self.meta)?;
                }
                Ordering::Greater => {
                    Self::emit(ctx, compare, FLAG_NEW)?;
                    compare.advance(ctx, &self.meta)?;
                }
                Ordering::Equal => {
                    if compare_fields(r, &reference.values, c, &compare.values) == Ordering::Equal {
                        let source = match self.identical {
                            IdenticalSource::Reference => &mut *reference,
                            IdenticalSource::Compare => &mut *compare,
                        };
                        Self::emit(ctx, source, FLAG_IDENTICAL)?;
                    } else {
                        Self::emit(ctx, compare, FLAG_CHANGED)?;
                    }
                    reference.advance(ctx, &self.meta)?;
                    compare.advance(ctx, &self.meta)?;
                }
            },
        }
        Ok(ProcessOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compare_fields() {
        let a = Row::new(vec![Value::Integer(1), Value::from("x")]);
        let b = Row::new(vec![Value::from("x"), Value::Integer(2)]);
        assert_eq!(compare_fields(&a, &[0], &b, &[1]), Ordering::Less);
        assert_eq!(compare_fields(&a, &[1], &b, &[0]), Ordering::Equal);
        assert_eq!(compare_fields(&a, &[1, 0], &b, &[0, 1]), Ordering::Less);
        assert_eq!(compare_fields(&a, &[], &b, &[]), Ordering::Equal);
    }

    #[test]
    fn test_new_requires_keys() {
        let step = StepMeta::new("merge", "MergeRows").with_config(json!({
            "reference_step": "a",
            "compare_step": "b"
        }));
        assert!(matches!(MergeRows::new(&step), Err(StepError::Config { .. })));
    }

    #[test]
    fn test_identical_source_setting() {
        let step = StepMeta::new("merge", "MergeRows").with_config(json!({
            "reference_step": "a",
            "compare_step": "b",
            "keys": ["id"],
            "identical_source": "reference"
        }));
        let merge = MergeRows::new(&step).unwrap();
        assert_eq!(merge.identical, IdenticalSource::Reference);
        assert_eq!(merge.meta.flag_field, "flagfield");
    }
}
