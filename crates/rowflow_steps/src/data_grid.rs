//! DataGrid: emits a fixed table of rows.

use std::sync::Arc;

use rowflow_core::{FieldMeta, Row, Schema, Value, ValueType};
use rowflow_plan::StepMeta;
use rowflow_runtime::{ProcessOutcome, Step, StepContext, StepError};
use serde::{Deserialize, Serialize};

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridField {
    /// Field name
    pub name: String,
    /// Field type
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Display length
    #[serde(default)]
    pub length: Option<u32>,
    /// Display precision
    #[serde(default)]
    pub precision: Option<u32>,
}

impl GridField {
    pub(crate) fn to_field_meta(&self) -> FieldMeta {
        let mut field = FieldMeta::new(self.name.clone(), self.value_type);
        if let Some(length) = self.length {
            field = field.with_length(length);
        }
        if let Some(precision) = self.precision {
            field = field.with_precision(precision);
        }
        field
    }
}

/// DataGrid settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataGridMeta {
    /// Columns
    pub fields: Vec<GridField>,
    /// Cell text per row; variables are resolved before parsing
    pub rows: Vec<Vec<String>>,
}

/// DataGrid step
#[derive(Debug)]
pub struct DataGrid {
    meta: DataGridMeta,
    schema: Arc<Schema>,
    rows: Vec<Row>,
    next: usize,
}

impl DataGrid {
    /// Build from a step definition
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be decoded or name a field twice
    pub fn new(step: &StepMeta) -> Result<Self, StepError> {
        let meta: DataGridMeta = step.config_as()?;
        let schema = Schema::from_fields(meta.fields.iter().map(GridField::to_field_meta))?;
        Ok(Self {
            meta,
            schema: Arc::new(schema),
            rows: Vec::new(),
            next: 0,
        })
    }
}

impl Step for DataGrid {
    fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let mut rows = Vec::with_capacity(self.meta.rows.len());
        for (nr, cells) in self.meta.rows.iter().enumerate() {
            if cells.len() != self.meta.fields.len() {
                return Err(StepError::config(
                    ctx.step_name(),
                    format!(
                        "row {} has {} values, expected {}",
                        nr + 1,
                        cells.len(),
                        self.meta.fields.len()
                    ),
                ));
            }
            let values = self
                .meta
                .fields
                .iter()
                .zip(cells)
                .map(|(field, cell)| Value::parse(field.value_type, &ctx.substitute(cell)))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(Row::new(values));
        }
        self.rows = rows;
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> Result<ProcessOutcome, StepError> {
        let Some(row) = self.rows.get(self.next).cloned() else {
            return Ok(ProcessOutcome::Done);
        };
        self.next += 1;
        ctx.metrics().record_input();
        ctx.put_row(&self.schema, row)?;
        Ok(ProcessOutcome::Continue)
    }

    fn dispose(&mut self, _ctx: &mut StepContext) {
        self.rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_from_settings() {
        let step = StepMeta::new("grid", "DataGrid").with_config(json!({
            "fields": [
                { "name": "id", "type": "Integer" },
                { "name": "name", "type": "String", "length": 20 }
            ],
            "rows": [["1", "a"]]
        }));
        let grid = DataGrid::new(&step).unwrap();
        assert_eq!(grid.schema.field_names(), vec!["id", "name"]);
        assert_eq!(grid.schema.field(1).unwrap().length, Some(20));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let step = StepMeta::new("grid", "DataGrid").with_config(json!({
            "fields": [
                { "name": "id", "type": "Integer" },
                { "name": "id", "type": "String" }
            ]
        }));
        assert!(matches!(DataGrid::new(&step), Err(StepError::Core(_))));
    }
}
