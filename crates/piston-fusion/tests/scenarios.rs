mod common;

use common::*;
use piston_fusion::{
    AxisId, DType, FuseType, FusionConfig, FusionDecider, FusionGraph, KernelId, OpKind, PortRef,
    RejectReason, StrategyRegistry, Subgraph, apply_view, apply_view_to_axes, back_step,
};

fn decider_parts() -> (StrategyRegistry, FusionConfig) {
    (StrategyRegistry::with_builtin(), FusionConfig::default())
}

#[test]
fn test_unrelated_pair_never_reaches_strategies() -> anyhow::Result<()> {
    init_logger();
    let mut graph = FusionGraph::new();
    let x = graph.add_input("x", DType::F32);
    let y = graph.add_input("y", DType::F32);
    let a = graph.add_kernel("a", pointwise("a", &[8, 4])?, &[PortRef::new(x, 0)])?;
    let b = graph.add_kernel("b", pointwise("b", &[8, 4])?, &[PortRef::new(y, 0)])?;

    let counter = CountingStrategy::default();
    let mut registry = StrategyRegistry::new();
    registry.register(FuseType::POINTWISE, counter.clone());
    let config = FusionConfig::default();
    let decider = FusionDecider::new(&registry, &config);

    let err = decider.decide(&graph, a, b).unwrap_err();
    assert_eq!(err.rejection(), Some(RejectReason::NoRelation));
    assert_eq!(counter.calls(), 0);

    // a related pair does reach it
    let c = graph.add_kernel("c", pointwise("c", &[8, 4])?, &[PortRef::new(a, 0)])?;
    decider.decide(&graph, a, c)?;
    assert_eq!(counter.calls(), 1);
    Ok(())
}

#[test]
fn test_broadcast_across_boundary() -> anyhow::Result<()> {
    init_logger();
    let producer = pointwise("producer", &[8, 4, 2])?;

    let mut consumer = Subgraph::new("consumer");
    let ys = axes(&mut consumer, &[8, 4, 2])?;
    let d = consumer.data(DType::F32)?;
    let l = consumer.load(d, strided(&ys, &[8, 1, 2], &[8, 0, 1]))?;
    let p = consumer.compute(OpKind::Pointwise, "mul", &[l], contiguous(&ys, &[8, 4, 2]))?;
    let s = consumer.store(p, contiguous(&ys, &[8, 4, 2]))?;
    consumer.output(s)?;

    // the descriptors alone
    let pre = consumer.input_desc(0)?;
    let post = producer.output_desc(0)?;
    let view = back_step(pre, post);
    let positions: Vec<usize> = view.broadcast.iter().map(|b| b.position).collect();
    assert_eq!(positions, vec![1]);
    assert!(view.transpose.is_empty());
    assert!(view.slice.is_none());
    let mut survivor = pre.clone();
    apply_view(&mut survivor, &view)?;
    assert_eq!(&survivor, post);

    // and through a full decision
    let mut graph = FusionGraph::new();
    let x = graph.add_input("x", DType::F32);
    let a = graph.add_kernel("producer", producer, &[PortRef::new(x, 0)])?;
    let b = graph.add_kernel("consumer", consumer, &[PortRef::new(a, 0)])?;
    let (registry, config) = decider_parts();
    let plan = FusionDecider::new(&registry, &config).decide(&graph, a, b)?;
    assert_eq!(plan.views.len(), 1);
    assert!(!plan.views[0].simplest);
    let positions: Vec<usize> = plan.views[0].view.broadcast.iter().map(|b| b.position).collect();
    assert_eq!(positions, vec![1]);
    Ok(())
}

#[test]
fn test_three_cycle_transpose() -> anyhow::Result<()> {
    init_logger();
    let (a, b, c) = (AxisId(0), AxisId(1), AxisId(2));
    let pre = contiguous(&[a, b, c], &[2, 3, 4]);
    let post = strided(&[c, a, b], &[4, 2, 3], &[1, 12, 4]);
    let view = back_step(&pre, &post);
    assert_eq!(view.transpose.len(), 2);

    let mut order = vec![a, b, c];
    apply_view_to_axes(&mut order, &view);
    assert_eq!(order, vec![c, a, b]);

    let mut survivor = pre.clone();
    apply_view(&mut survivor, &view)?;
    assert_eq!(survivor, post);
    Ok(())
}

#[test]
fn test_transposed_read_is_fusable() -> anyhow::Result<()> {
    init_logger();
    let producer = pointwise("producer", &[2, 3, 4])?;

    let mut consumer = Subgraph::new("consumer");
    let ys = axes(&mut consumer, &[2, 3, 4])?;
    let d = consumer.data(DType::F32)?;
    let l = consumer.load(d, strided(&[ys[2], ys[0], ys[1]], &[4, 2, 3], &[1, 12, 4]))?;
    let out = contiguous(&ys, &[2, 3, 4]);
    let p = consumer.compute(OpKind::Pointwise, "exp", &[l], out.clone())?;
    let s = consumer.store(p, out)?;
    consumer.output(s)?;

    let mut graph = FusionGraph::new();
    let x = graph.add_input("x", DType::F32);
    let a = graph.add_kernel("producer", producer, &[PortRef::new(x, 0)])?;
    let b = graph.add_kernel("consumer", consumer, &[PortRef::new(a, 0)])?;
    let (registry, config) = decider_parts();
    let plan = FusionDecider::new(&registry, &config).decide(&graph, a, b)?;
    for i in 0..3 {
        assert_eq!(plan.map1.get(AxisId(i)), plan.map2.get(AxisId(i)));
    }
    assert_eq!(plan.views[0].view.transpose.len(), 2);
    Ok(())
}

#[test]
fn test_concat_and_reduction_never_fuse() -> anyhow::Result<()> {
    init_logger();
    let (registry, config) = decider_parts();
    let decider = FusionDecider::new(&registry, &config);
    let expected = Some("concat-cannot-fuse-reduction");

    // reduction feeding concat, offered in both orders
    let mut graph = FusionGraph::new();
    let x = graph.add_input("x", DType::F32);
    let r = graph.add_kernel("sum", reduction("sum", 0)?, &[PortRef::new(x, 0)])?;
    let c = graph.add_kernel(
        "cat",
        single("cat", OpKind::Concat, &[8, 1], 1)?,
        &[PortRef::new(r, 0)],
    )?;
    for (p, q) in [(r, c), (c, r)] {
        let err = decider.decide(&graph, p, q).unwrap_err();
        assert_eq!(err.rejection().map(|r| r.code()), expected);
    }

    // concat feeding reduction
    let mut graph = FusionGraph::new();
    let x = graph.add_input("x", DType::F32);
    let c = graph.add_kernel(
        "cat",
        single("cat", OpKind::Concat, &[8, 4], 1)?,
        &[PortRef::new(x, 0)],
    )?;
    let r = graph.add_kernel("sum", reduction("sum", 0)?, &[PortRef::new(c, 0)])?;
    for (p, q) in [(c, r), (r, c)] {
        let err = decider.decide(&graph, p, q).unwrap_err();
        assert_eq!(err.rejection().map(|r| r.code()), expected);
    }

    // siblings of one input
    let mut graph = FusionGraph::new();
    let x = graph.add_input("x", DType::F32);
    let c = graph.add_kernel(
        "cat",
        single("cat", OpKind::Concat, &[8, 4], 1)?,
        &[PortRef::new(x, 0)],
    )?;
    let r = graph.add_kernel("sum", reduction("sum", 0)?, &[PortRef::new(x, 0)])?;
    let err = decider.decide(&graph, r, c).unwrap_err();
    assert_eq!(err.rejection().map(|r| r.code()), expected);
    Ok(())
}

fn reduce_then_pointwise(epilogue: usize, config: &FusionConfig) -> anyhow::Result<Option<RejectReason>> {
    let mut graph = FusionGraph::new();
    let x = graph.add_input("x", DType::F32);
    let r = graph.add_kernel("sum", reduction("sum", epilogue)?, &[PortRef::new(x, 0)])?;
    let p = graph.add_kernel("relu", pointwise("relu", &[8])?, &[PortRef::new(r, 0)])?;
    let registry = StrategyRegistry::with_builtin();
    let result = FusionDecider::new(&registry, config).decide(&graph, r, p);
    Ok(result.err().and_then(|e| e.rejection()))
}

#[test]
fn test_reduction_epilogue_budget() -> anyhow::Result<()> {
    init_logger();
    let config = FusionConfig::default();
    assert_eq!(config.max_reduce_backward_fuse_count, 3);
    assert_eq!(reduce_then_pointwise(0, &config)?, None);
    assert_eq!(reduce_then_pointwise(2, &config)?, None);
    assert_eq!(
        reduce_then_pointwise(3, &config)?,
        Some(RejectReason::ReductionExceedsBackwardFuseBudget)
    );

    let roomier = FusionConfig::default().with_max_reduce_backward_fuse_count(4);
    assert_eq!(reduce_then_pointwise(3, &roomier)?, None);
    Ok(())
}

#[test]
fn test_decisions_are_deterministic() -> anyhow::Result<()> {
    init_logger();
    let mut graph = FusionGraph::new();
    let x = graph.add_input("x", DType::F32);
    let a = graph.add_kernel("a", pointwise("a", &[4, 4, 2])?, &[PortRef::new(x, 0)])?;
    let b = graph.add_kernel("b", pointwise("b", &[4, 4, 2])?, &[PortRef::new(x, 0)])?;
    let c = graph.add_kernel("c", pointwise("c", &[4, 4, 2])?, &[PortRef::new(a, 0)])?;

    let (registry, config) = decider_parts();
    let decider = FusionDecider::new(&registry, &config);
    for (p, q) in [(a, b), (a, c)] {
        let first = decider.decide(&graph, p, q)?;
        let second = decider.decide(&graph, p, q)?;
        assert_eq!(first, second);

        let mut targets: Vec<usize> = first
            .map1
            .iter()
            .chain(first.map2.iter())
            .map(|(_, t)| t.0)
            .collect();
        targets.sort();
        targets.dedup();
        assert_eq!(targets, (0..targets.len()).collect::<Vec<_>>());
    }
    Ok(())
}

#[test]
fn test_decide_all_counts_reasons() -> anyhow::Result<()> {
    init_logger();
    let mut graph = FusionGraph::new();
    let x = graph.add_input("x", DType::F32);
    let y = graph.add_input("y", DType::F32);
    let a = graph.add_kernel("a", pointwise("a", &[8, 4])?, &[PortRef::new(x, 0)])?;
    let b = graph.add_kernel("b", pointwise("b", &[8, 4])?, &[PortRef::new(a, 0)])?;
    let c = graph.add_kernel("c", pointwise("c", &[8, 4])?, &[PortRef::new(y, 0)])?;
    let d = graph.add_kernel("d", pointwise("d", &[3, 5])?, &[PortRef::new(y, 0)])?;

    let (registry, config) = decider_parts();
    let (plans, stats) =
        FusionDecider::new(&registry, &config).decide_all(&graph, &[(a, b), (a, c), (c, d)])?;
    assert_eq!(plans.len(), 1);
    assert_eq!(stats.approved, 1);
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.reasons.get("no-relation"), Some(&1));
    assert_eq!(stats.reasons.get("axis-sizes-disagree"), Some(&1));
    log::info!("{stats}");
    Ok(())
}

/// Pointwise over `sizes`, reading its single input with its own axes listed in
/// `read_order`.
fn permuted_reader(
    name: &str,
    sizes: &[i64],
    read_order: &[usize],
) -> anyhow::Result<Subgraph> {
    let mut sg = Subgraph::new(name);
    let zs = axes(&mut sg, sizes)?;
    let read_axes: Vec<AxisId> = read_order.iter().map(|&i| zs[i]).collect();
    let read_sizes: Vec<i64> = read_order.iter().map(|&i| sizes[i]).collect();
    let d = sg.data(DType::F32)?;
    let l = sg.load(d, contiguous(&read_axes, &read_sizes))?;
    let out = contiguous(&zs, sizes);
    let p = sg.compute(OpKind::Pointwise, "exp", &[l], out.clone())?;
    let s = sg.store(p, out)?;
    sg.output(s)?;
    Ok(sg)
}

#[test]
fn test_crossed_siblings_cannot_share_loop() -> anyhow::Result<()> {
    init_logger();
    // both read x as [8, 4]: a loops [4, 8] and reads it transposed, b loops [8, 4]
    let mut graph = FusionGraph::new();
    let x = graph.add_input("x", DType::F32);
    let mut reader = |name: &str, sizes: &[i64], order: &[usize]| -> anyhow::Result<KernelId> {
        let body = permuted_reader(name, sizes, order)?;
        Ok(graph.add_kernel(name, body, &[PortRef::new(x, 0)])?)
    };
    let a = reader("a", &[4, 8], &[1, 0])?;
    let b = reader("b", &[8, 4], &[0, 1])?;
    let c = reader("c", &[4, 8], &[1, 0])?;

    let (registry, config) = decider_parts();
    let decider = FusionDecider::new(&registry, &config);
    let err = decider.decide(&graph, a, b).unwrap_err();
    assert_eq!(err.rejection(), Some(RejectReason::LoopMergeMismatch));
    decider.decide(&graph, a, c)?;
    Ok(())
}

/// `x -> producer -> consumer` plus `x -> consumer`, over axes sized [2, 3, 5]. The
/// producer/consumer link covers the first two axes and the shared input the last two.
fn overlapping_links(
    producer_kind: OpKind,
) -> anyhow::Result<(FusionGraph, KernelId, KernelId)> {
    let sizes = [2i64, 3, 5];
    let mut producer = Subgraph::new("producer");
    let xs = axes(&mut producer, &sizes)?;
    let d = producer.data(DType::F32)?;
    let l = producer.load(d, contiguous(&xs[1..], &sizes[1..]))?;
    let out = contiguous(&xs[..2], &sizes[..2]);
    let op = producer.compute(producer_kind, "mm", &[l], out.clone())?;
    let s = producer.store(op, out)?;
    producer.output(s)?;

    let mut consumer = Subgraph::new("consumer");
    let ys = axes(&mut consumer, &sizes)?;
    let from_producer = consumer.data(DType::F32)?;
    let l0 = consumer.load(from_producer, contiguous(&ys[..2], &sizes[..2]))?;
    let from_x = consumer.data(DType::F32)?;
    let l1 = consumer.load(from_x, contiguous(&ys[1..], &sizes[1..]))?;
    let full = contiguous(&ys, &sizes);
    let op = consumer.compute(OpKind::Pointwise, "add", &[l0, l1], full.clone())?;
    let s = consumer.store(op, full)?;
    consumer.output(s)?;

    let mut graph = FusionGraph::new();
    let x = graph.add_input("x", DType::F32);
    let p = graph.add_kernel("producer", producer, &[PortRef::new(x, 0)])?;
    let c = graph.add_kernel(
        "consumer",
        consumer,
        &[PortRef::new(p, 0), PortRef::new(x, 0)],
    )?;
    Ok((graph, p, c))
}

#[test]
fn test_links_covering_different_axes_disagree() -> anyhow::Result<()> {
    init_logger();
    let (graph, p, c) = overlapping_links(OpKind::Pointwise)?;
    let (registry, config) = decider_parts();
    let err = FusionDecider::new(&registry, &config)
        .decide(&graph, p, c)
        .unwrap_err();
    assert_eq!(err.rejection(), Some(RejectReason::AxisMapInconsistent));
    Ok(())
}

#[test]
fn test_cube_maps_only_vertical_links() -> anyhow::Result<()> {
    init_logger();
    // same shape as above, but the shared input is left out of the axis mapping
    let (graph, p, c) = overlapping_links(OpKind::Cube)?;
    let (registry, config) = decider_parts();
    let plan = FusionDecider::new(&registry, &config).decide(&graph, p, c)?;
    assert_eq!(plan.connectivity.same_inputs, vec![(0, 1)]);
    for i in 0..3 {
        assert_eq!(plan.map1.get(AxisId(i)), plan.map2.get(AxisId(i)));
    }
    Ok(())
}

