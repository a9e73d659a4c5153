//! Build matrix expansion.

use crate::manifest::{BuildManifest, MatrixConfig};
use stagerun_core::environment::{BuildContext, BuildEnvironment, MatrixEntry};

/// Expand a matrix into one entry per job.
///
/// Listed entries are crossed with every axis in declaration order, entry
/// major. Combinations matching an exclude are dropped. A matrix with no
/// entries and no axes yields a single empty entry.
pub fn expand(matrix: &MatrixConfig) -> Vec<MatrixEntry> {
    let mut combinations = if matrix.entries.is_empty() {
        vec![MatrixEntry::new()]
    } else {
        matrix.entries.clone()
    };

    for (name, values) in &matrix.axes {
        combinations = combinations
            .into_iter()
            .flat_map(|base| {
                values
                    .iter()
                    .map(move |value| base.clone().with(name.clone(), value.clone()))
            })
            .collect();
    }

    combinations.retain(|entry| !matrix.excludes.iter().any(|ex| matches_exclude(entry, ex)));
    combinations
}

fn matches_exclude(entry: &MatrixEntry, exclude: &MatrixEntry) -> bool {
    !exclude.is_empty() && exclude.iter().all(|(k, v)| entry.get(k) == Some(v))
}

/// Build the environment of every job in the manifest's matrix.
pub fn plan_jobs(manifest: &BuildManifest, context: &BuildContext) -> Vec<BuildEnvironment> {
    expand(&manifest.matrix)
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| {
            let job_number = idx + 1;
            let job_name = if entry.is_empty() {
                format!("job {}", job_number)
            } else {
                entry.label()
            };
            BuildEnvironment {
                job_number,
                job_name,
                global: manifest.global.clone(),
                matrix: entry,
                context: context.clone(),
            }
        })
        .collect()
}
