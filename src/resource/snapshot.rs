//! Snapshots: topologically ordered resource lists.
//!
//! Target snapshots ([`Snapshot::new`], [`Snapshot::from_unordered`]) are
//! strict: unique monikers, no cycles, no references outside the snapshot.
//!
//! Recorded snapshots ([`Snapshot::checkpoint`], [`Snapshot::restore`]) are
//! ordered by input references only and tolerate dangling or misordered
//! references with a warning. A failed replacement can leave a dependent
//! pointing at a resource that no longer exists.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::resource::Resource;
use super::tokens::Moniker;
use crate::error::GraphError;

/// An ordered collection of resources, dependencies first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Resource>", into = "Vec<Resource>")]
pub struct Snapshot {
    resources: Vec<Resource>,
}

/// Target snapshots are checked strictly, recorded ones leniently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    Strict,
    Lenient,
}

impl Snapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            resources: Vec::new(),
        }
    }

    /// Wraps resources that are already in dependency order.
    ///
    /// # Errors
    ///
    /// Fails on duplicate monikers, forward references, and references to
    /// monikers that are not in the list.
    pub fn new(resources: Vec<Resource>) -> Result<Self, GraphError> {
        verify_order(&resources, Check::Strict)?;
        Ok(Self { resources })
    }

    /// Orders resources so every dependency precedes its dependents.
    ///
    /// Among resources that are ready at the same time, the one with the
    /// lowest input position goes first, so an already ordered list comes
    /// back unchanged.
    ///
    /// # Errors
    ///
    /// Fails on duplicate monikers, unknown references, and cycles.
    pub fn from_unordered(resources: Vec<Resource>) -> Result<Self, GraphError> {
        let resources = topological_sort(resources)?;
        Ok(Self { resources })
    }

    /// Orders the partial result of an apply run.
    ///
    /// The first resource with a given moniker wins; anything that cannot be
    /// ordered is kept in input order and logged.
    #[must_use]
    pub fn checkpoint(resources: Vec<Resource>) -> Self {
        Self {
            resources: checkpoint_order(resources),
        }
    }

    /// Rebuilds a snapshot read back from a stored record.
    ///
    /// # Errors
    ///
    /// Fails on duplicate monikers.
    pub fn restore(resources: Vec<Resource>) -> Result<Self, GraphError> {
        verify_order(&resources, Check::Lenient)?;
        Ok(Self { resources })
    }

    /// Position of every resource, keyed by moniker.
    #[must_use]
    pub fn index(&self) -> HashMap<&Moniker, usize> {
        self.resources
            .iter()
            .enumerate()
            .map(|(i, r)| (&r.moniker, i))
            .collect()
    }

    /// Looks up a resource by moniker.
    #[must_use]
    pub fn get(&self, moniker: &Moniker) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.moniker == moniker)
    }

    /// Returns true if a resource with this moniker exists.
    #[must_use]
    pub fn contains(&self, moniker: &Moniker) -> bool {
        self.get(moniker).is_some()
    }

    /// Iterates resources in dependency order.
    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.resources.iter()
    }

    /// The resources as a slice.
    #[must_use]
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Consumes the snapshot, returning its resources.
    #[must_use]
    pub fn into_resources(self) -> Vec<Resource> {
        self.resources
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the snapshot holds no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl TryFrom<Vec<Resource>> for Snapshot {
    type Error = GraphError;

    fn try_from(resources: Vec<Resource>) -> Result<Self, Self::Error> {
        Self::restore(resources)
    }
}

impl From<Snapshot> for Vec<Resource> {
    fn from(snapshot: Snapshot) -> Self {
        snapshot.resources
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}

fn unique_positions(resources: &[Resource]) -> Result<HashMap<&Moniker, usize>, GraphError> {
    let mut positions = HashMap::with_capacity(resources.len());
    for (i, resource) in resources.iter().enumerate() {
        if positions.insert(&resource.moniker, i).is_some() {
            return Err(GraphError::DuplicateMoniker {
                moniker: resource.moniker.to_string(),
            });
        }
    }
    Ok(positions)
}

/// References that constrain the order of a snapshot under `check`.
///
/// Recorded snapshots only order by inputs: outputs are whatever a provider
/// returned and may point anywhere, including back at the resource itself.
fn ordering_dependencies(resource: &Resource, check: Check) -> BTreeSet<Moniker> {
    match check {
        Check::Strict => resource.dependencies(),
        Check::Lenient => {
            let mut deps = resource.inputs.references();
            deps.remove(&resource.moniker);
            deps
        }
    }
}

fn verify_order(resources: &[Resource], check: Check) -> Result<(), GraphError> {
    let positions = unique_positions(resources)?;

    for (i, resource) in resources.iter().enumerate() {
        for dep in ordering_dependencies(resource, check) {
            match (positions.get(&dep), check) {
                (Some(&j), _) if j < i => {}
                (Some(_), Check::Strict) => {
                    return Err(GraphError::ForwardReference {
                        from: resource.moniker.to_string(),
                        to: dep.to_string(),
                    });
                }
                (Some(_), Check::Lenient) => {
                    warn!(from = %resource.moniker, to = %dep, "Recorded resource precedes its dependency");
                }
                (None, Check::Strict) => {
                    return Err(GraphError::UnknownReference {
                        from: resource.moniker.to_string(),
                        to: dep.to_string(),
                    });
                }
                (None, Check::Lenient) => {
                    warn!(from = %resource.moniker, to = %dep, "Resource references a moniker outside the snapshot");
                }
            }
        }
    }

    Ok(())
}

/// Kahn's algorithm with lowest-index-first tie breaking.
///
/// Returns the visiting order and the remaining in-degrees; any index left
/// with a non-zero in-degree sits on or behind a cycle.
fn kahn(mut in_degree: Vec<usize>, dependents: &[Vec<usize>]) -> (Vec<usize>, Vec<usize>) {
    let mut ready: BTreeSet<usize> = (0..in_degree.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.insert(d);
            }
        }
    }

    (order, in_degree)
}

fn take_in_order(resources: Vec<Resource>, order: Vec<usize>) -> Vec<Resource> {
    let mut slots: Vec<Option<Resource>> = resources.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

fn topological_sort(resources: Vec<Resource>) -> Result<Vec<Resource>, GraphError> {
    let n = resources.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    {
        let positions = unique_positions(&resources)?;
        for (i, resource) in resources.iter().enumerate() {
            for dep in ordering_dependencies(resource, Check::Strict) {
                let Some(&j) = positions.get(&dep) else {
                    return Err(GraphError::UnknownReference {
                        from: resource.moniker.to_string(),
                        to: dep.to_string(),
                    });
                };
                in_degree[i] += 1;
                dependents[j].push(i);
            }
        }
    }

    let (order, remaining) = kahn(in_degree, &dependents);
    if order.len() < n {
        let monikers = (0..n)
            .filter(|&i| remaining[i] > 0)
            .map(|i| resources[i].moniker.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(GraphError::Cycle { monikers });
    }

    Ok(take_in_order(resources, order))
}

/// Best-effort ordering for checkpoints. Never fails.
///
/// Later duplicates of a moniker are dropped. Resources caught in a cycle
/// keep their relative input order after everything that could be sorted.
fn checkpoint_order(resources: Vec<Resource>) -> Vec<Resource> {
    let mut seen = HashSet::with_capacity(resources.len());
    let resources: Vec<Resource> = resources
        .into_iter()
        .filter(|r| {
            let first = seen.insert(r.moniker.clone());
            if !first {
                warn!(moniker = %r.moniker, id = ?r.id, "Dropping duplicate moniker from checkpoint");
            }
            first
        })
        .collect();

    let n = resources.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    {
        let positions: HashMap<&Moniker, usize> =
            resources.iter().enumerate().map(|(i, r)| (&r.moniker, i)).collect();
        for (i, resource) in resources.iter().enumerate() {
            for dep in ordering_dependencies(resource, Check::Lenient) {
                if let Some(&j) = positions.get(&dep) {
                    in_degree[i] += 1;
                    dependents[j].push(i);
                } else {
                    warn!(from = %resource.moniker, to = %dep, "Resource references a moniker outside the snapshot");
                }
            }
        }
    }

    let (mut order, remaining) = kahn(in_degree, &dependents);
    if order.len() < n {
        let stuck: Vec<usize> = (0..n).filter(|&i| remaining[i] > 0).collect();
        warn!(
            monikers = %stuck.iter().map(|&i| resources[i].moniker.as_str()).collect::<Vec<_>>().join(", "),
            "Checkpoint inputs form a cycle, keeping their apply order"
        );
        order.extend(stuck);
    }

    take_in_order(resources, order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{PropertyMap, TypeToken};

    fn res(name: &str, deps: &[&str]) -> Resource {
        let mut props = PropertyMap::new().with("name", name);
        for (i, dep) in deps.iter().enumerate() {
            props.insert(format!("dep{i}"), Moniker::from(*dep));
        }
        Resource::new(TypeToken::from("test:index:Thing"), Moniker::from(name), props)
    }

    fn names(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.iter().map(|r| r.moniker.as_str()).collect()
    }

    #[test]
    fn test_new_accepts_ordered_resources() {
        let snapshot = Snapshot::new(vec![res("a", &[]), res("b", &["a"])]).expect("ordered");
        assert_eq!(names(&snapshot), vec!["a", "b"]);
        assert_eq!(snapshot.index().get(&Moniker::from("b")), Some(&1));
    }

    #[test]
    fn test_new_rejects_forward_reference() {
        let err = Snapshot::new(vec![res("b", &["a"]), res("a", &[])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::ForwardReference {
                from: "b".to_string(),
                to: "a".to_string()
            }
        );
    }

    #[test]
    fn test_new_rejects_dangling_and_duplicates() {
        assert!(matches!(
            Snapshot::new(vec![res("a", &["ghost"])]),
            Err(GraphError::UnknownReference { .. })
        ));
        assert!(matches!(
            Snapshot::new(vec![res("a", &[]), res("a", &[])]),
            Err(GraphError::DuplicateMoniker { .. })
        ));
    }

    #[test]
    fn test_from_unordered_sorts_dependencies_first() {
        let snapshot = Snapshot::from_unordered(vec![
            res("app", &["db", "net"]),
            res("db", &["net"]),
            res("net", &[]),
            res("dns", &[]),
        ])
        .expect("acyclic");
        assert_eq!(names(&snapshot), vec!["net", "db", "app", "dns"]);
    }

    #[test]
    fn test_from_unordered_keeps_valid_order() {
        let input = vec![res("x", &[]), res("y", &[]), res("z", &["x"]), res("w", &["y", "z"])];
        let expected: Vec<String> = input.iter().map(|r| r.moniker.to_string()).collect();
        let snapshot = Snapshot::from_unordered(input).expect("acyclic");
        let got: Vec<String> = snapshot.iter().map(|r| r.moniker.to_string()).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_cycle_is_reported() {
        let err = Snapshot::from_unordered(vec![
            res("a", &["c"]),
            res("b", &["a"]),
            res("c", &["b"]),
            res("free", &[]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                monikers: "a, b, c".to_string()
            }
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        assert!(matches!(
            Snapshot::from_unordered(vec![res("a", &["a"])]),
            Err(GraphError::Cycle { .. })
        ));
        assert!(matches!(
            Snapshot::new(vec![res("a", &["a"])]),
            Err(GraphError::ForwardReference { .. })
        ));
    }

    #[test]
    fn test_checkpoint_tolerates_dangling_references() {
        let snapshot = Snapshot::checkpoint(vec![res("b", &["gone"]), res("a", &[])]);
        assert_eq!(names(&snapshot), vec!["b", "a"]);
    }

    #[test]
    fn test_checkpoint_ignores_output_references() {
        let mut site = res("site", &[]);
        site.outputs = PropertyMap::new()
            .with("self_link", Moniker::from("site"))
            .with("cdn", Moniker::from("cdn"));
        let cdn = res("cdn", &["site"]);

        let snapshot = Snapshot::checkpoint(vec![site, cdn]);
        assert_eq!(names(&snapshot), vec!["site", "cdn"]);

        let json = serde_json::to_string(&snapshot).expect("serialize");
        let parsed: Snapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_checkpoint_skips_self_input_reference() {
        let snapshot = Snapshot::checkpoint(vec![res("b", &["a"]), res("a", &["a"])]);
        assert_eq!(names(&snapshot), vec!["a", "b"]);
    }

    #[test]
    fn test_checkpoint_keeps_cycles_in_input_order() {
        let snapshot = Snapshot::checkpoint(vec![
            res("x", &["y"]),
            res("free", &[]),
            res("y", &["x"]),
            res("tail", &["free"]),
        ]);
        assert_eq!(names(&snapshot), vec!["free", "tail", "x", "y"]);
    }

    #[test]
    fn test_checkpoint_keeps_first_duplicate() {
        let mut newer = res("a", &[]);
        newer.outputs = PropertyMap::new().with("generation", 2);
        let mut older = res("a", &[]);
        older.outputs = PropertyMap::new().with("generation", 1);

        let snapshot = Snapshot::checkpoint(vec![newer.clone(), older]);
        assert_eq!(snapshot.resources(), &[newer]);
    }

    #[test]
    fn test_deserialize_tolerates_order_but_not_duplicates() {
        let ordered = Snapshot::new(vec![res("a", &[]), res("b", &["a"])]).expect("ordered");
        let json = serde_json::to_string(&ordered).expect("serialize");
        let parsed: Snapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, ordered);

        let mut reversed = ordered.clone().into_resources();
        reversed.reverse();
        let json = serde_json::to_string(&reversed).expect("serialize");
        let parsed: Snapshot = serde_json::from_str(&json).expect("misordered record still loads");
        assert_eq!(names(&parsed), vec!["b", "a"]);

        let mut doubled = ordered.into_resources();
        doubled.push(res("a", &[]));
        let json = serde_json::to_string(&doubled).expect("serialize");
        assert!(serde_json::from_str::<Snapshot>(&json).is_err());
    }
}
