// src/job/matrix.rs

//! Matrix expansion: one descriptor with a `parallel` directive becomes N
//! independent variants.

use tracing::{debug, warn};

use crate::job::descriptor::{JobDescriptor, MatrixEntry, NodeIndex, ParallelSpec};

/// Upper bound on keys absorbed into one matrix entry's product.
pub const MAX_EXPANSION_ROUNDS: usize = 100;

/// Matrix expander for `parallel` jobs.
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand every descriptor, keeping declaration order.
    pub fn expand_all(descriptors: Vec<JobDescriptor>) -> Vec<JobDescriptor> {
        descriptors.iter().flat_map(Self::expand).collect()
    }

    /// Expand one descriptor into its variants.
    ///
    /// A descriptor without `parallel` comes back as a single copy.
    pub fn expand(descriptor: &JobDescriptor) -> Vec<JobDescriptor> {
        match &descriptor.parallel {
            None => {
                let mut copy = descriptor.clone();
                copy.parallel = None;
                vec![copy]
            }
            Some(ParallelSpec::Count(total)) => Self::expand_count(descriptor, *total),
            Some(ParallelSpec::Matrix(entries)) => Self::expand_matrix(descriptor, entries),
        }
    }

    fn expand_count(descriptor: &JobDescriptor, total: u32) -> Vec<JobDescriptor> {
        debug!(job = %descriptor.name, total, "expanding parallel count");
        (1..=total)
            .map(|index| {
                let mut variant = Self::variant_of(descriptor);
                variant.name = format!("{}: [{}/{}]", descriptor.name, index, total);
                variant.node = Some(NodeIndex { index, total });
                variant
            })
            .collect()
    }

    fn expand_matrix(descriptor: &JobDescriptor, entries: &[MatrixEntry]) -> Vec<JobDescriptor> {
        let assignments: Vec<Vec<(String, String)>> =
            entries.iter().flat_map(Self::expand_entry).collect();

        debug!(
            job = %descriptor.name,
            entries = entries.len(),
            variants = assignments.len(),
            "expanding parallel matrix"
        );

        assignments
            .into_iter()
            .map(|assignment| {
                let mut variant = Self::variant_of(descriptor);
                let summary: Vec<&str> = assignment.iter().map(|(_, v)| v.as_str()).collect();
                variant.name = format!("{}: [{}]", descriptor.name, summary.join(", "));
                for (key, value) in assignment.iter() {
                    variant.variables.insert(key.clone(), value.clone());
                }
                variant.matrix = assignment;
                variant
            })
            .collect()
    }

    /// Cartesian product of one matrix map, in first-seen key order.
    ///
    /// Keys are consumed one at a time and crossed with the partial
    /// combinations built so far. After [`MAX_EXPANSION_ROUNDS`] rounds the
    /// remaining keys are ignored.
    pub fn expand_entry(entry: &MatrixEntry) -> Vec<Vec<(String, String)>> {
        let mut working: Vec<(String, Vec<String>)> = entry.keys.clone();
        let mut combos: Vec<Vec<(String, String)>> = vec![Vec::new()];
        let mut rounds = 0;

        while !working.is_empty() {
            if rounds == MAX_EXPANSION_ROUNDS {
                warn!(
                    remaining = working.len(),
                    "matrix expansion round limit reached; ignoring remaining keys"
                );
                break;
            }
            rounds += 1;

            let (key, values) = working.remove(0);
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in combos.iter() {
                for value in values.iter() {
                    let mut extended = combo.clone();
                    extended.push((key.clone(), value.clone()));
                    next.push(extended);
                }
            }
            combos = next;
        }

        if entry.keys.is_empty() {
            return Vec::new();
        }
        combos
    }

    /// Owned deep copy of the template with `parallel` cleared.
    fn variant_of(descriptor: &JobDescriptor) -> JobDescriptor {
        let mut variant = descriptor.clone();
        variant.parallel = None;
        variant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parallel_job(parallel: ParallelSpec) -> JobDescriptor {
        let mut job = JobDescriptor::new("build", "build");
        job.parallel = Some(parallel);
        job
    }

    #[test]
    fn count_produces_positional_names() {
        let variants = MatrixExpander::expand(&parallel_job(ParallelSpec::Count(3)));
        let names: Vec<_> = variants.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["build: [1/3]", "build: [2/3]", "build: [3/3]"]);
        assert!(variants.iter().all(|v| v.base_name == "build"));
        assert!(variants.iter().all(|v| v.variables.is_empty()));
        assert_eq!(variants[1].node, Some(NodeIndex { index: 2, total: 3 }));
    }

    #[test]
    fn entry_product_uses_first_seen_key_order() {
        let entry = MatrixEntry::new()
            .with("OS", &["linux", "mac"])
            .with("ARCH", &["x86", "arm"]);
        let combos = MatrixExpander::expand_entry(&entry);
        assert_eq!(combos.len(), 4);
        assert_eq!(
            combos[0],
            vec![
                ("OS".to_string(), "linux".to_string()),
                ("ARCH".to_string(), "x86".to_string())
            ]
        );
        assert_eq!(combos[1][1].1, "arm");
        assert_eq!(combos[2][0].1, "mac");
    }

    #[test]
    fn entries_are_concatenated_not_multiplied() {
        let job = parallel_job(ParallelSpec::Matrix(vec![
            MatrixEntry::new().with("A", &["1", "2"]),
            MatrixEntry::new().with("B", &["x", "y", "z"]),
        ]));
        assert_eq!(MatrixExpander::expand(&job).len(), 5);
    }

    #[test]
    fn empty_entry_yields_nothing() {
        assert!(MatrixExpander::expand_entry(&MatrixEntry::new()).is_empty());
    }

    #[test]
    fn round_limit_stops_absorbing_keys() {
        let mut entry = MatrixEntry::new();
        for i in 0..(MAX_EXPANSION_ROUNDS + 5) {
            entry = entry.with(format!("K{i}"), &["v"]);
        }
        let combos = MatrixExpander::expand_entry(&entry);
        assert_eq!(combos.len(), 1);
        assert_eq!(combos[0].len(), MAX_EXPANSION_ROUNDS);
    }

    #[test]
    fn plain_job_is_returned_as_single_copy() {
        let job = JobDescriptor::new("lint", "test");
        let out = MatrixExpander::expand(&job);
        assert_eq!(out, vec![job]);
    }
}
