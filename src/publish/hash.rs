//! Content hashes that tie an artifact to its inputs.
//!
//! Fields are length-prefixed before hashing so `("ab", "c")` and `("a", "bc")`
//! never collide. Floats are hashed by bit pattern.

use crate::compute::Catalog;
use crate::store::{ParamKind, ParameterStore, Quantity};

struct Digest(blake3::Hasher);

impl Digest {
    fn new(domain: &str) -> Self {
        let mut d = Digest(blake3::Hasher::new());
        d.text(domain);
        d
    }

    fn text(&mut self, s: &str) {
        self.0.update(&(s.len() as u64).to_le_bytes());
        self.0.update(s.as_bytes());
    }

    fn float(&mut self, v: Option<f64>) {
        match v {
            Some(v) => {
                self.0.update(&[1]);
                self.0.update(&v.to_bits().to_le_bytes());
            }
            None => {
                self.0.update(&[0]);
            }
        }
    }

    fn quantity(&mut self, q: Option<Quantity>) {
        self.float(q.map(|q| q.value));
        self.float(q.and_then(|q| q.uncertainty));
    }

    fn hex(self) -> String { self.0.finalize().to_hex().to_string() }
}

/// BLAKE3 over every fundamental parameter (sorted by id): unit, value and
/// uncertainty. Two generations with the same axiom hash had identical inputs.
pub fn axiom_hash(store: &ParameterStore) -> String {
    let mut fundamentals: Vec<_> = store.iter().filter(|p| p.kind == ParamKind::Fundamental).collect();
    fundamentals.sort_by(|a, b| a.id.cmp(&b.id));

    let mut d = Digest::new("axioms/v1");
    for p in fundamentals {
        d.text(&p.id);
        d.text(p.unit().as_str());
        d.quantity(p.quantity);
    }
    d.hex()
}

/// BLAKE3 over the code side of a registry: declarations, modules (ids,
/// inputs, outputs, formula text) and gates, in registration order.
pub fn catalog_hash(catalog: &Catalog) -> String {
    let mut d = Digest::new("catalog/v1");
    for (id, decl) in catalog.params() {
        d.text(id);
        d.text(decl.schema.unit.as_str());
        d.text(&format!("{:?}/{}/{}", decl.kind, decl.schema.bounds, decl.schema.severity));
    }
    for module in catalog.modules() {
        d.text(&module.id);
        for input in &module.inputs {
            d.text(input);
        }
        d.text("->");
        for (output, formula) in module.outputs.iter().zip(&module.formulas) {
            d.text(output);
            d.text(formula.as_ref().map_or("<native>", |f| f.source()));
        }
    }
    for gate in catalog.gates() {
        d.text(&gate.id);
        d.text(&gate.predicate.describe());
        d.text(&gate.severity.to_string());
        for p in &gate.parameters_checked {
            d.text(p);
        }
    }
    d.hex()
}

/// `"<label>-<first 12 hex digits of the axiom hash>"`.
pub fn generation_id(label: &str, axiom_hash: &str) -> String {
    format!("{}-{}", label, &axiom_hash[..axiom_hash.len().min(12)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ModuleSpec;
    use crate::store::ParamSchema;

    fn store(g: f64) -> ParameterStore {
        let mut store = ParameterStore::new();
        store.declare("g", ParamSchema::new("1"), ParamKind::Fundamental).unwrap();
        store.declare("y", ParamSchema::new("1"), ParamKind::Derived).unwrap();
        store.resolve("g", Quantity::exact(g), None).unwrap();
        store
    }

    #[test]
    fn test_axiom_hash_tracks_fundamentals_only() {
        let a = axiom_hash(&store(1.0));
        assert_eq!(a, axiom_hash(&store(1.0)));
        assert_ne!(a, axiom_hash(&store(1.5)));

        let mut with_y = store(1.0);
        let inputs = vec!["g".to_string()];
        with_y
            .resolve("y", Quantity::exact(9.0), Some(crate::store::Provenance { module: "Y", inputs: &inputs }))
            .unwrap();
        assert_eq!(a, axiom_hash(&with_y));
    }

    #[test]
    fn test_catalog_hash_tracks_formula_text() {
        let build = |src: &str| {
            let mut cat = Catalog::new();
            cat.declare("g", ParamSchema::new("1"), ParamKind::Fundamental).unwrap();
            cat.declare("y", ParamSchema::new("1"), ParamKind::Derived).unwrap();
            cat.register(ModuleSpec::new("Y").inputs(["g"]).formula("y", src)).unwrap();
            catalog_hash(&cat)
        };
        assert_eq!(build("g * 2"), build("g * 2"));
        assert_ne!(build("g * 2"), build("g * 3"));
    }

    #[test]
    fn test_generation_id_format() {
        let id = generation_id("nightly", &axiom_hash(&store(1.0)));
        assert!(id.starts_with("nightly-"));
        assert_eq!(id.len(), "nightly-".len() + 12);
    }
}
