use twap_engine::aggregation::{Aggregator, OpenInterval};
use twap_engine::types::{BlockObservation, TwapState};
use twap_engine::window::{WindowId, WindowSpec};

const EPSILON: f64 = 1e-6;

/// Deterministic pseudo-random chain: gaps between 1 and 30 seconds, fees
/// between 1 and 100 gwei.
fn irregular_chain(seed: u64, len: usize) -> Vec<BlockObservation> {
    let mut state = seed;
    let mut next = || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        state >> 33
    };

    let mut timestamp = 1_700_000_000;
    (0..len)
        .map(|i| {
            timestamp += 1 + next() % 30;
            let fee = (1 + next() % 100) as f64 * 1e9;
            BlockObservation::new(20_000_000 + i as u64, timestamp, Some(fee))
        })
        .collect()
}

fn assert_derived(state: &TwapState) {
    let expected = if state.total_seconds() == 0 {
        0.0
    } else {
        state.weighted_sum() / state.total_seconds() as f64
    };
    assert_eq!(state.twap_value(), expected);
}

#[test]
fn test_every_fold_keeps_twap_derived() {
    let aggregator = Aggregator::default();
    let window = WindowSpec::new(WindowId::TwelveMin, 720);

    for seed in 1..20 {
        let blocks = irregular_chain(seed, 120);
        let mut state: Option<TwapState> = None;
        for chunk in blocks.chunks(7) {
            let next = aggregator.fold(state.as_ref(), &window, chunk, OpenInterval::Nominal, 0);
            assert_derived(&next);
            assert_eq!(next.last_block_number(), chunk.last().unwrap().number);
            state = Some(next);
        }
    }
}

#[test]
fn test_chunking_does_not_change_result_when_window_covers_history() {
    let aggregator = Aggregator::default();
    let window = WindowSpec::new(WindowId::ThirtyDay, 2_592_000);

    for seed in 1..20 {
        let blocks = irregular_chain(seed, 90);
        let (seed_block, rest) = blocks.split_first().unwrap();
        let prior = aggregator.fold(
            None,
            &window,
            std::slice::from_ref(seed_block),
            OpenInterval::Until(rest[0].timestamp),
            0,
        );
        let open = OpenInterval::Nominal;

        let whole = aggregator.fold(Some(&prior), &window, rest, open, 0);

        let mut chunked = prior;
        let chunks: Vec<&[BlockObservation]> = rest.chunks(11).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let close = match chunks.get(i + 1) {
                Some(next) => OpenInterval::Until(next[0].timestamp),
                None => open,
            };
            chunked = aggregator.fold(Some(&chunked), &window, chunk, close, 0);
        }

        let relative = (whole.weighted_sum() - chunked.weighted_sum()).abs() / whole.weighted_sum();
        assert!(relative < EPSILON, "seed {seed}: {relative}");
        assert_eq!(whole.total_seconds(), chunked.total_seconds());
    }
}

#[test]
fn test_rebuild_equals_streaming_when_window_covers_history() {
    let aggregator = Aggregator::default();
    let window = WindowSpec::new(WindowId::ThirtyDay, 2_592_000);

    for seed in 1..10 {
        let blocks = irregular_chain(seed, 60);
        let mut streamed: Option<TwapState> = None;
        for pair in blocks.windows(2) {
            streamed = Some(aggregator.fold(
                streamed.as_ref(),
                &window,
                &pair[..1],
                OpenInterval::Until(pair[1].timestamp),
                0,
            ));
        }
        let streamed = streamed.unwrap();

        let (last, folded) = blocks.split_last().unwrap();
        let rebuilt = aggregator.rebuild(&window, folded, OpenInterval::Successor(last.timestamp), 0);

        let relative =
            (streamed.weighted_sum() - rebuilt.weighted_sum()).abs() / rebuilt.weighted_sum();
        assert!(relative < EPSILON, "seed {seed}: {relative}");
        assert_eq!(streamed.total_seconds(), rebuilt.total_seconds());
        assert!((streamed.twap_value() - rebuilt.twap_value()).abs() / rebuilt.twap_value() < EPSILON);
    }
}

#[test]
fn test_rebuild_total_never_exceeds_window() {
    let aggregator = Aggregator::default();
    let window = WindowSpec::new(WindowId::TwelveMin, 120);

    for seed in 1..20 {
        let blocks = irregular_chain(seed, 200);
        let timeline = aggregator.timeline(&blocks, OpenInterval::Nominal);
        for k in 0..timeline.len() {
            let state = timeline.state_at(&window, k);
            assert!(state.total_seconds() <= window.duration_secs);
            assert!(state.weighted_sum() >= 0.0);
            assert_derived(&state);
        }
    }
}

#[test]
fn test_uniform_spacing_matches_arithmetic_mean() {
    let aggregator = Aggregator::default();
    let window = WindowSpec::new(WindowId::ThreeHour, 10_800);
    let fees = [14.0, 21.5, 9.25, 30.0, 18.0, 11.0, 25.5, 16.0];
    let blocks: Vec<_> = fees
        .iter()
        .enumerate()
        .map(|(i, &fee)| BlockObservation::new(i as u64, 1_000 + 12 * i as u64, Some(fee)))
        .collect();

    let state = aggregator.rebuild(
        &window,
        &blocks,
        OpenInterval::Successor(1_000 + 12 * fees.len() as u64),
        0,
    );

    let mean = fees.iter().sum::<f64>() / fees.len() as f64;
    assert!((state.twap_value() - mean).abs() < 1e-12);
}

/// Index of the newest block strictly older than `timestamp`, the row a
/// windowed history query prepends.
fn straddling(blocks: &[BlockObservation], timestamp: u64) -> usize {
    blocks
        .iter()
        .rposition(|b| b.timestamp < timestamp)
        .unwrap_or(0)
}

/// First block whose window starts after the oldest block, so the history
/// fills the whole window.
fn full_from(blocks: &[BlockObservation], window: &WindowSpec) -> usize {
    let oldest = blocks[0].timestamp;
    blocks
        .iter()
        .position(|b| b.timestamp > oldest + window.duration_secs)
        .unwrap_or(blocks.len())
}

#[test]
fn test_rebuild_from_trailing_history_matches_full_history() {
    let aggregator = Aggregator::default();
    let window = WindowSpec::new(WindowId::TwelveMin, 120);

    for seed in 1..20 {
        let blocks = irregular_chain(seed, 200);
        let timeline = aggregator.timeline(&blocks, OpenInterval::Nominal);

        for k in 0..blocks.len() - 1 {
            let from = blocks[k].timestamp.saturating_sub(window.duration_secs);
            let trailing = &blocks[straddling(&blocks, from)..=k];
            let open = OpenInterval::Successor(blocks[k + 1].timestamp);

            let rebuilt = aggregator.rebuild(&window, trailing, open, 0);
            let snapshot = timeline.state_at(&window, k);

            assert!(
                (rebuilt.weighted_sum() - snapshot.weighted_sum()).abs()
                    <= EPSILON * snapshot.weighted_sum().max(1.0),
                "seed {seed} block {k}"
            );
            assert_eq!(rebuilt.total_seconds(), snapshot.total_seconds());
        }
    }
}

#[test]
fn test_twap_stays_within_fees_once_window_is_full() {
    let aggregator = Aggregator::default();
    let window = WindowSpec::new(WindowId::TwelveMin, 120);

    for seed in 1..20 {
        let blocks = irregular_chain(seed, 200);
        let timeline = aggregator.timeline(&blocks, OpenInterval::Nominal);
        for k in full_from(&blocks, &window)..blocks.len() {
            let window_start = blocks[k].timestamp - window.duration_secs;
            let contributing = &blocks[straddling(&blocks, window_start + 1)..k];
            let low = contributing.iter().filter_map(|b| b.fee()).fold(f64::MAX, f64::min);
            let high = contributing.iter().filter_map(|b| b.fee()).fold(0.0, f64::max);

            let state = timeline.state_at(&window, k);
            assert_eq!(state.total_seconds(), window.duration_secs, "seed {seed} block {k}");
            assert!(state.twap_value() >= low * (1.0 - EPSILON), "seed {seed} block {k}");
            assert!(state.twap_value() <= high * (1.0 + EPSILON), "seed {seed} block {k}");
        }
    }
}

#[test]
fn test_constant_fee_is_reported_exactly() {
    let aggregator = Aggregator::default();
    let window = WindowSpec::new(WindowId::TwelveMin, 120);

    for seed in 1..10 {
        let blocks: Vec<_> = irregular_chain(seed, 200)
            .into_iter()
            .map(|b| BlockObservation::new(b.number, b.timestamp, Some(5e9)))
            .collect();
        let timeline = aggregator.timeline(&blocks, OpenInterval::Nominal);

        for k in full_from(&blocks, &window)..timeline.len() {
            let state = timeline.state_at(&window, k);
            assert_eq!(state.total_seconds(), window.duration_secs);
            assert!((state.twap_value() - 5e9).abs() < 5e9 * EPSILON, "seed {seed} block {k}");
        }
    }
}
