//! Deterministic topological ordering of workflow steps.

use std::collections::BTreeSet;

use crate::error::CompileError;

/// Orders step indices so every step follows its dependencies.
///
/// `dependencies[i]` lists the indices step `i` depends on. Among the steps that
/// are ready at any point, the one declared first is emitted first, so a fixed
/// definition always compiles to the same order.
pub(crate) fn order_steps(names: &[&str], dependencies: &[BTreeSet<usize>]) -> Result<Vec<usize>, CompileError> {
    let step_count = names.len();
    let mut in_degrees: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); step_count];
    for (step, step_dependencies) in dependencies.iter().enumerate() {
        for &dependency in step_dependencies {
            dependents[dependency].push(step);
        }
    }

    let mut ready: BTreeSet<usize> = (0..step_count).filter(|&step| in_degrees[step] == 0).collect();
    let mut ordered = Vec::with_capacity(step_count);
    while let Some(step) = ready.pop_first() {
        ordered.push(step);
        for &dependent in &dependents[step] {
            in_degrees[dependent] -= 1;
            if in_degrees[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if ordered.len() != step_count {
        let on_cycle = step_on_cycle(&in_degrees, dependencies);
        return Err(CompileError::CyclicDependency {
            step: names[on_cycle].to_string(),
        });
    }
    Ok(ordered)
}

/// Every step left with a positive in-degree has an unemitted dependency, so
/// following those dependencies backwards must revisit a step; that step lies on a cycle.
fn step_on_cycle(in_degrees: &[usize], dependencies: &[BTreeSet<usize>]) -> usize {
    let remaining = |step: usize| in_degrees[step] > 0;
    let Some(mut current) = (0..in_degrees.len()).find(|&step| remaining(step)) else {
        return 0;
    };
    let mut visited = BTreeSet::new();
    while visited.insert(current) {
        match dependencies[current].iter().copied().find(|&dependency| remaining(dependency)) {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(lists: &[&[usize]]) -> Vec<BTreeSet<usize>> {
        lists.iter().map(|list| list.iter().copied().collect()).collect()
    }

    #[test]
    fn ties_break_by_declaration_order() {
        let names = ["c", "a", "b", "d"];
        // d depends on a; b depends on c
        let order = order_steps(&names, &deps(&[&[], &[], &[0], &[1]])).expect("order");
        assert_eq!(order, vec![0, 1, 2, 3]);

        let order = order_steps(&names, &deps(&[&[3], &[], &[], &[]])).expect("order");
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn cycle_error_names_a_step_on_the_cycle() {
        // a -> b -> c -> b, with a itself not on the cycle
        let names = ["a", "b", "c", "tail"];
        let error = order_steps(&names, &deps(&[&[], &[0, 2], &[1], &[2]])).expect_err("cycle");
        match error {
            CompileError::CyclicDependency { step } => assert!(step == "b" || step == "c", "{step}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let error = order_steps(&["solo"], &deps(&[&[0]])).expect_err("cycle");
        assert!(matches!(error, CompileError::CyclicDependency { step } if step == "solo"));
    }
}
