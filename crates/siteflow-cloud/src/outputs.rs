//! Output evaluation

use crate::state::{OutputValue, Snapshot};
use siteflow_core::Site;
use std::collections::BTreeMap;
use tracing::warn;

/// Evaluate the site's outputs against materialized attributes
///
/// Outputs that reference attributes not (yet) in the snapshot are left out.
pub fn evaluate_outputs(site: &Site, snapshot: &Snapshot) -> BTreeMap<String, OutputValue> {
    let mut outputs = BTreeMap::new();
    for (name, output) in &site.outputs {
        match output.value.evaluate(&|r| snapshot.lookup(r)) {
            Some(value) => {
                outputs.insert(
                    name.clone(),
                    OutputValue {
                        value,
                        sensitive: output.sensitive,
                        description: output.description.clone(),
                    },
                );
            }
            None => warn!(output = %name, "Output references unknown values; skipped"),
        }
    }
    outputs
}
