//! Orders structs and enums so every aggregate is defined after the aggregates
//! it contains by value.

use crate::language::{
    errors::LayoutError,
    ir::{IrProgram, IrType},
};
use petgraph::{algo::tarjan_scc, graph::DiGraph};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Nominal {
    Struct(String),
    Enum(String),
}

impl Nominal {
    pub fn name(&self) -> &str {
        match self {
            Nominal::Struct(name) | Nominal::Enum(name) => name,
        }
    }
}

/// Named aggregate a member stores inline. `List` elements live behind a
/// pointer and never constrain the order.
fn by_value(ty: &IrType) -> Option<&str> {
    match ty {
        IrType::Struct(name) | IrType::Enum(name) => Some(name),
        _ => None,
    }
}

/// Kahn's algorithm over the containment graph with a name-ordered ready set.
pub fn layout_order(program: &IrProgram) -> Result<Vec<Nominal>, LayoutError> {
    let mut nodes: BTreeMap<&str, Nominal> = BTreeMap::new();
    let mut deps: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (name, layout) in &program.structs {
        nodes.insert(name.as_str(), Nominal::Struct(name.clone()));
        let entry = deps.entry(name.as_str()).or_default();
        entry.extend(layout.fields.iter().filter_map(|(_, ty)| by_value(ty)));
    }
    for (name, layout) in &program.enums {
        nodes.insert(name.as_str(), Nominal::Enum(name.clone()));
        let entry = deps.entry(name.as_str()).or_default();
        entry.extend(
            layout
                .variants
                .iter()
                .filter_map(|variant| variant.payload.as_ref().and_then(by_value)),
        );
    }
    // References to aggregates the program never declared are the emitter's
    // problem, not an ordering constraint.
    for targets in deps.values_mut() {
        targets.retain(|target| nodes.contains_key(target));
    }

    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    for (name, targets) in &deps {
        pending.insert(*name, targets.len());
        for target in targets {
            dependents.entry(*target).or_default().push(*name);
        }
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(name) = ready.pop_first() {
        if let Some(nominal) = nodes.get(name) {
            order.push(nominal.clone());
        }
        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }
    let placed: BTreeSet<&str> = order.iter().map(Nominal::name).collect();
    Err(LayoutError {
        cycles: find_cycles(&deps, &placed),
    })
}

/// Strongly connected components of the aggregates Kahn's algorithm could not
/// place; each is reported with its members sorted.
fn find_cycles(deps: &BTreeMap<&str, BTreeSet<&str>>, placed: &BTreeSet<&str>) -> Vec<Vec<String>> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut index = BTreeMap::new();
    for name in deps.keys().filter(|name| !placed.contains(*name)) {
        index.insert(*name, graph.add_node(*name));
    }
    for (name, targets) in deps {
        let Some(&from) = index.get(name) else {
            continue;
        };
        for target in targets {
            if let Some(&to) = index.get(target) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|component| {
            component.len() > 1 || graph.contains_edge(component[0], component[0])
        })
        .map(|component| {
            let mut members: Vec<String> = component
                .into_iter()
                .map(|node| graph[node].to_string())
                .collect();
            members.sort();
            members
        })
        .collect();
    cycles.sort();
    cycles
}
