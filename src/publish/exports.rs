//! Secondary representations. Each one is rendered from the canonical artifact
//! only, never from the live store, so they cannot drift from it.

use super::artifact::Artifact;
use super::PublishError;
use std::collections::BTreeMap;

pub trait Export {
    /// File name written next to the canonical artifact.
    fn file_name(&self) -> &str;
    fn render(&self, artifact: &Artifact) -> Result<String, PublishError>;
}

/// Flattened constants table, one row per parameter in declaration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantsCsv;

impl Export for ConstantsCsv {
    fn file_name(&self) -> &str { "constants.csv" }

    fn render(&self, artifact: &Artifact) -> Result<String, PublishError> {
        let mut out = String::from("id,value,uncertainty,unit,status,producer\n");
        for (id, e) in artifact.ordered() {
            let row = [
                csv_field(id),
                e.value.map(|v| format!("{:?}", v)).unwrap_or_default(),
                e.uncertainty.map(|v| format!("{:?}", v)).unwrap_or_default(),
                csv_field(e.unit.as_str()),
                format!("{:?}", e.status).to_lowercase(),
                e.producer.as_deref().map(csv_field).unwrap_or_default(),
            ];
            out.push_str(&row.join(","));
            out.push('\n');
        }
        Ok(out)
    }
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// `{id: value}` for consumers that only need numbers. Unresolved parameters are omitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatJson;

impl Export for FlatJson {
    fn file_name(&self) -> &str { "values.json" }

    fn render(&self, artifact: &Artifact) -> Result<String, PublishError> {
        let values: BTreeMap<&str, f64> =
            artifact.parameters.iter().filter_map(|(id, e)| e.value.map(|v| (id.as_str(), v))).collect();
        let mut json = serde_json::to_string_pretty(&values)?;
        json.push('\n');
        Ok(json)
    }
}

pub fn default_exports() -> Vec<Box<dyn Export>> {
    vec![Box::new(ConstantsCsv), Box::new(FlatJson)]
}
