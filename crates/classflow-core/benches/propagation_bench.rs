use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use classflow_core::graph::{propagate_types, ConstraintGraph, NodeKind, TypeFlow};
use classflow_core::{SymbolTable, TypeRef};
use classflow_ir::VtableBuilder;
use classflow_test_helpers::ProgramBuilder;

fn hierarchy() -> (SymbolTable, Vec<TypeRef>) {
    let mut builder = ProgramBuilder::library("bench");
    let animal = builder.class("Animal", vec![]);
    let cat = builder.final_class("Cat", vec![animal]);
    let dog = builder.final_class("Dog", vec![animal]);
    let program = builder.finish();

    let vtables = VtableBuilder::new(&program).unwrap();
    let mut symbols = SymbolTable::new();
    let mapping = symbols.build_module(&program, &vtables).unwrap();
    (
        symbols,
        vec![
            mapping.type_of(animal),
            mapping.type_of(cat),
            mapping.type_of(dog),
        ],
    )
}

/// A long chain with periodic joins, cast edges and back edges; roughly the
/// shape deep call graphs condense into.
fn chain_graph(length: usize, types: &[TypeRef]) -> ConstraintGraph {
    let mut graph = ConstraintGraph::new();
    let mut previous = graph.add_node(NodeKind::Source(TypeFlow {
        ty: types[1],
        is_virtual: false,
    }));
    for i in 0..length {
        let node = graph.add_ordinary();
        if i % 7 == 3 {
            graph.add_cast_edge(previous, node, types[0]);
        } else {
            graph.add_edge(previous, node);
        }
        if i % 13 == 11 {
            // Back edge, forming a cycle.
            graph.add_edge(node, previous);
        }
        if i % 5 == 0 {
            let source = graph.add_node(NodeKind::Source(TypeFlow {
                ty: types[2],
                is_virtual: false,
            }));
            graph.add_edge(source, node);
        }
        previous = node;
    }
    graph
}

fn bench_propagation(c: &mut Criterion) {
    let (symbols, types) = hierarchy();
    let mut group = c.benchmark_group("propagation");
    for length in [1_000usize, 10_000, 50_000] {
        group.bench_with_input(BenchmarkId::from_parameter(length), &length, |b, &length| {
            b.iter_batched(
                || chain_graph(length, &types),
                |mut graph| {
                    propagate_types(black_box(&mut graph), &symbols);
                    graph
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_propagation);
criterion_main!(benches);
