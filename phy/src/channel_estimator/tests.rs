use super::*;
use crate::dmrs::DmrsSequenceGenerator;
use common::types::SubcarrierSpacing;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::{FRAC_1_SQRT_2, PI};

fn dmrs(symbols: &[usize]) -> SymbolMask {
    SymbolMask::from_symbols(symbols).unwrap()
}

fn config(re_mask: ReMask, dmrs_symbols: &[usize], smoothing: FdSmoothing) -> EstimatorConfig {
    EstimatorConfig {
        re_mask,
        dmrs_symbols: dmrs(dmrs_symbols),
        timing: SlotTiming::for_scs(SubcarrierSpacing::Scs15).unwrap(),
        second_cdm_re_mask: None,
        smoothing,
        td_interpolation: TdInterpolation::Average,
        compensate_cfo: true,
    }
}

/// Hop covering the whole grid and slot
fn full_hop(grid_prb: usize, re_mask: ReMask, dmrs_symbols: &[usize]) -> HopConfig {
    HopConfig::contiguous(grid_prb, 0, grid_prb, re_mask, dmrs(dmrs_symbols), 0..14).unwrap()
}

fn qpsk_pilots(rows: usize, columns: usize, seed: u32) -> Array3<Complex64> {
    layer_pilots(rows, columns, 1, seed)
}

/// QPSK pilots of `nof_layers` layers; odd layers carry the cover [+1, -1]
/// over each pair of pilot REs
fn layer_pilots(rows: usize, columns: usize, nof_layers: usize, seed: u32) -> Array3<Complex64> {
    let mut generator = DmrsSequenceGenerator::new(seed);
    let base = Array2::from_shape_fn((rows, columns), |_| generator.next_qpsk_symbol(FRAC_1_SQRT_2));
    Array3::from_shape_fn((rows, columns, nof_layers), |(k, i, layer)| {
        if layer % 2 == 1 && k % 2 == 1 {
            -base[(k, i)]
        } else {
            base[(k, i)]
        }
    })
}

/// Received grid carrying only the pilots of `hops` through `channel(k, l)`
fn received_grid(
    nof_subcarriers: usize,
    hops: &[&HopConfig],
    pilots: &Array3<Complex64>,
    beta: f64,
    channel: impl Fn(usize, usize) -> Complex64,
) -> Array2<Complex64> {
    received_layers(nof_subcarriers, hops, pilots, None, beta, |k, l, _| channel(k, l))
}

/// Received grid with the pilots of every layer through `channel(k, l, layer)`
///
/// Layers 2 and 3 are mapped on `second_mask`.
fn received_layers(
    nof_subcarriers: usize,
    hops: &[&HopConfig],
    pilots: &Array3<Complex64>,
    second_mask: Option<ReMask>,
    beta: f64,
    channel: impl Fn(usize, usize, usize) -> Complex64,
) -> Array2<Complex64> {
    let mut grid = Array2::zeros((nof_subcarriers, NSYMB_PER_SLOT));
    let mut column = 0;
    for hop in hops {
        for l in hop.dmrs_symbols.iter() {
            for layer in 0..pilots.dim().2 {
                let re_mask = if layer < 2 { hop.re_mask } else { second_mask.unwrap() };
                for (row, k) in hop.with_re_mask(re_mask).pilot_subcarriers().into_iter().enumerate() {
                    grid[(k, l)] += channel(k, l, layer) * pilots[(row, column, layer)] * beta;
                }
            }
            column += 1;
        }
    }
    grid
}

fn add_pilot_noise(grid: &mut Array2<Complex64>, hops: &[&HopConfig], variance: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, (variance / 2.0).sqrt()).unwrap();
    for hop in hops {
        for l in hop.dmrs_symbols.iter() {
            for k in hop.pilot_subcarriers() {
                grid[(k, l)] += Complex64::new(normal.sample(&mut rng), normal.sample(&mut rng));
            }
        }
    }
}

#[test]
fn test_noiseless_unit_channel() {
    let re_mask = ReMask::comb(4, 0).unwrap();
    let hop = full_hop(1, re_mask, &[2, 11]);
    let pilots = qpsk_pilots(3, 2, 42);
    let grid = received_grid(12, &[&hop], &pilots, 1.0, |_, _| Complex64::new(1.0, 0.0));

    let estimator = PortChannelEstimator::new(config(re_mask, &[2, 11], FdSmoothing::Filter));
    let estimate = estimator.estimate(grid.view(), pilots.view(), 1.0, &hop, None).unwrap();

    assert_eq!(estimate.channel.dim(), (12, 14, 1));
    assert_eq!(estimate.nof_layers(), 1);
    for h in estimate.channel.iter() {
        assert!((h - Complex64::new(1.0, 0.0)).norm() < 1e-9, "channel {} is not unit", h);
    }
    assert!(estimate.noise_var < 1e-20);
    assert!(estimate.time_alignment.abs() < 1e-12);
    assert!(estimate.cfo_hz.unwrap().abs() < 1e-9);
    assert!((estimate.rsrp - 1.0).abs() < 1e-9);
    assert!((estimate.epre - 1.0).abs() < 1e-9);
}

#[test]
fn test_noise_variance_estimate() {
    let variance = 0.01;
    let nof_prb = 200;
    let re_mask = ReMask::comb(2, 0).unwrap();
    let hop = full_hop(nof_prb, re_mask, &[2, 11]);
    let pilots = qpsk_pilots(hop.nof_pilot_res(), 2, 7);
    let gain = Complex64::from_polar(1.0, -0.7);
    let mut grid = received_grid(nof_prb * NRE, &[&hop], &pilots, 1.0, |_, _| gain);
    add_pilot_noise(&mut grid, &[&hop], variance, 1234);

    let estimator = PortChannelEstimator::new(config(re_mask, &[2, 11], FdSmoothing::Mean));
    let estimate = estimator.estimate(grid.view(), pilots.view(), 1.0, &hop, None).unwrap();

    let error = (estimate.noise_var - variance).abs() / variance;
    assert!(error < 0.1, "noise variance {} vs. {}", estimate.noise_var, variance);
    assert!((estimate.rsrp - 1.0).abs() < 0.05);
    assert!((estimate.sinr - estimate.rsrp / estimate.noise_var).abs() < 1e-9);
    assert!((estimate.epre - (1.0 + variance)).abs() < 0.05);
}

#[test]
fn test_estimate_is_deterministic() {
    let re_mask = ReMask::comb(2, 1).unwrap();
    let hop = full_hop(8, re_mask, &[3, 10]);
    let pilots = qpsk_pilots(hop.nof_pilot_res(), 2, 99);
    let mut grid = received_grid(96, &[&hop], &pilots, 1.5, |k, _| Complex64::from_polar(1.0, 0.01 * k as f64));
    add_pilot_noise(&mut grid, &[&hop], 0.05, 5);

    let estimator = PortChannelEstimator::new(config(re_mask, &[3, 10], FdSmoothing::Filter));
    let first = estimator.estimate(grid.view(), pilots.view(), 1.5, &hop, None).unwrap();
    let second = estimator.estimate(grid.view(), pilots.view(), 1.5, &hop, None).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_dense_mask_without_smoothing_returns_ls() {
    let hop = full_hop(2, ReMask::ALL, &[2, 11]);
    let pilots = qpsk_pilots(24, 2, 3);
    let grid = received_grid(24, &[&hop], &pilots, 1.0, |k, l| {
        Complex64::from_polar(0.5 + 0.05 * k as f64, 0.3 * k as f64 + 0.1 * l as f64)
    });

    let mut cfg = config(ReMask::ALL, &[2, 11], FdSmoothing::None);
    cfg.compensate_cfo = false;
    let estimate = PortChannelEstimator::new(cfg)
        .estimate(grid.view(), pilots.view(), 1.0, &hop, None)
        .unwrap();

    for k in 0..24 {
        let ls = (grid[(k, 2)] * pilots[(k, 0, 0)].conj() + grid[(k, 11)] * pilots[(k, 1, 0)].conj()) / 2.0;
        for l in 0..NSYMB_PER_SLOT {
            assert_eq!(estimate.channel[(k, l, 0)], ls);
        }
    }
}

#[test]
fn test_cfo_round_trip() {
    let offset = 0.01;
    let gain = Complex64::from_polar(0.9, 0.4);
    let re_mask = ReMask::comb(2, 0).unwrap();
    let hop = full_hop(4, re_mask, &[2, 11]);
    let pilots = qpsk_pilots(hop.nof_pilot_res(), 2, 11);
    let cfg = config(re_mask, &[2, 11], FdSmoothing::Filter);
    let start = cfg.timing.symbol_start_times();
    let grid = received_grid(48, &[&hop], &pilots, 1.0, |_, l| gain * cfo::phase_rotation(offset, start[l]));

    let estimate = PortChannelEstimator::new(cfg.clone())
        .estimate(grid.view(), pilots.view(), 1.0, &hop, None)
        .unwrap();

    let cfo_hz = estimate.cfo_hz.unwrap();
    assert!((cfo_hz - offset * 15e3).abs() < 1e-6, "CFO {} Hz", cfo_hz);
    assert!(estimate.noise_var < 1e-20);

    // The grid follows the rotation; once removed, no drift across symbols
    let estimated = cfo_hz / 15e3;
    for k in 0..48 {
        for l in 0..NSYMB_PER_SLOT {
            let truth = gain * cfo::phase_rotation(offset, start[l]);
            assert!((estimate.channel[(k, l, 0)] - truth).norm() < 1e-9);
            let derotated = estimate.channel[(k, l, 0)] * cfo::phase_rotation(estimated, start[l]).conj();
            assert!((derotated.arg() - gain.arg()).abs() < 1e-9);
        }
    }

    // Without compensation the phase ramp leaks into the residual
    let mut uncompensated = cfg;
    uncompensated.compensate_cfo = false;
    let estimate = PortChannelEstimator::new(uncompensated)
        .estimate(grid.view(), pilots.view(), 1.0, &hop, None)
        .unwrap();
    assert!(estimate.noise_var > 1e-2);
    assert!((estimate.cfo_hz.unwrap() - cfo_hz).abs() < 1e-9);
}

#[test]
fn test_hopping_time_alignment_is_averaged() {
    let delay_bins = 12.0;
    let re_mask = ReMask::comb(2, 0).unwrap();
    let hop1 = HopConfig::contiguous(50, 0, 25, re_mask, dmrs(&[2]), 0..7).unwrap();
    let hop2 = HopConfig::contiguous(50, 25, 25, re_mask, dmrs(&[9]), 7..14).unwrap();
    let pilots = qpsk_pilots(150, 2, 21);
    let grid = received_grid(600, &[&hop1, &hop2], &pilots, 1.0, |k, _| {
        Complex64::from_polar(1.0, -2.0 * PI * k as f64 * delay_bins / TIMING_IFFT_SIZE as f64)
    });

    let estimator = PortChannelEstimator::new(config(re_mask, &[2, 9], FdSmoothing::None));
    let estimate = estimator
        .estimate(grid.view(), pilots.view(), 1.0, &hop1, Some(&hop2))
        .unwrap();

    let expected = delay_bins / (TIMING_IFFT_SIZE as f64 * 15e3);
    assert!((estimate.time_alignment - expected).abs() < 1e-12);
    // One DM-RS symbol per hop: no CFO
    assert_eq!(estimate.cfo_hz, None);

    // Each hop only fills its own PRBs and symbols
    assert_eq!(estimate.channel[(400, 3, 0)], Complex64::new(0.0, 0.0));
    assert_eq!(estimate.channel[(100, 10, 0)], Complex64::new(0.0, 0.0));
    assert!((estimate.channel[(100, 3, 0)].norm() - 1.0).abs() < 1e-9);
    assert!((estimate.channel[(400, 10, 0)].norm() - 1.0).abs() < 1e-9);
}

#[test]
fn test_second_hop_without_dmrs_is_ignored() {
    let re_mask = ReMask::comb(2, 0).unwrap();
    let hop1 = HopConfig::contiguous(10, 0, 5, re_mask, dmrs(&[2, 4]), 0..14).unwrap();
    let hop2 = HopConfig::contiguous(10, 5, 5, re_mask, SymbolMask::default(), 7..14).unwrap();
    let pilots = qpsk_pilots(30, 2, 8);
    let mut grid = received_grid(120, &[&hop1], &pilots, 1.0, |_, _| Complex64::new(0.3, 0.4));
    add_pilot_noise(&mut grid, &[&hop1], 0.01, 77);

    let estimator = PortChannelEstimator::new(config(re_mask, &[2, 4], FdSmoothing::Filter));
    let with_empty = estimator
        .estimate(grid.view(), pilots.view(), 1.0, &hop1, Some(&hop2))
        .unwrap();
    let without = estimator.estimate(grid.view(), pilots.view(), 1.0, &hop1, None).unwrap();
    assert_eq!(with_empty, without);
}

#[test]
fn test_overlapping_hops_are_rejected() {
    let re_mask = ReMask::comb(2, 0).unwrap();
    let hop1 = HopConfig::contiguous(10, 0, 4, re_mask, dmrs(&[2]), 0..7).unwrap();
    let hop2 = HopConfig::contiguous(10, 2, 4, re_mask, dmrs(&[9]), 5..14).unwrap();
    let pilots = qpsk_pilots(24, 2, 1);
    let grid = received_grid(120, &[&hop1, &hop2], &pilots, 1.0, |_, _| Complex64::new(1.0, 0.0));

    let estimator = PortChannelEstimator::new(config(re_mask, &[2, 9], FdSmoothing::None));
    assert_eq!(
        estimator
            .estimate(grid.view(), pilots.view(), 1.0, &hop1, Some(&hop2))
            .unwrap_err(),
        PhyError::OverlappingHops { subcarrier: 24, symbol: 5 }
    );
}

#[test]
fn test_merge_hop_grids() {
    let value = Complex64::new(2.0, -1.0);
    let first = HopGrid {
        subcarriers: vec![0, 1, 2],
        values: Array2::from_elem((3, 7), value),
        symbols: 0..7,
    };
    let second = HopGrid {
        subcarriers: vec![6, 7, 8],
        values: Array2::from_elem((3, 7), -value),
        symbols: 7..14,
    };

    let merged = merge_hop_grids(12, &[first.clone(), second]).unwrap();
    assert_eq!(merged[(1, 6)], value);
    assert_eq!(merged[(7, 7)], -value);
    assert_eq!(merged[(7, 6)], Complex64::new(0.0, 0.0));
    assert_eq!(merged.iter().filter(|h| h.norm() > 0.0).count(), 42);

    assert_eq!(
        merge_hop_grids(12, &[first.clone(), first]).unwrap_err(),
        PhyError::OverlappingHops { subcarrier: 0, symbol: 0 }
    );
}

#[test]
fn test_single_pilot_has_no_noise_estimate() {
    let re_mask = ReMask::from_subcarriers(&[5]).unwrap();
    let hop = full_hop(1, re_mask, &[3]);
    let pilots = qpsk_pilots(1, 1, 4);
    let grid = received_grid(12, &[&hop], &pilots, 1.0, |_, _| Complex64::new(0.0, 2.0));

    let estimate = PortChannelEstimator::new(config(re_mask, &[3], FdSmoothing::Filter))
        .estimate(grid.view(), pilots.view(), 1.0, &hop, None)
        .unwrap();

    assert_eq!(estimate.noise_var, 0.0);
    assert_eq!(estimate.sinr, f64::INFINITY);
    assert_eq!(estimate.cfo_hz, None);
    assert!(estimate.channel.iter().all(|h| (h - Complex64::new(0.0, 2.0)).norm() < 1e-12));
}

#[test]
fn test_smoothing_strategy_names() {
    assert_eq!("mean".parse::<FdSmoothing>().unwrap(), FdSmoothing::Mean);
    assert_eq!(FdSmoothing::Filter.to_string(), "filter");
    assert_eq!(
        "cubic".parse::<FdSmoothing>().unwrap_err(),
        PhyError::UnknownSmoothingStrategy("cubic".to_string())
    );
}

#[test]
fn test_invalid_inputs() {
    let re_mask = ReMask::comb(2, 0).unwrap();
    let hop = full_hop(2, re_mask, &[2, 11]);
    let pilots = qpsk_pilots(12, 2, 6);
    let grid = received_grid(24, &[&hop], &pilots, 1.0, |_, _| Complex64::new(1.0, 0.0));
    let estimator = PortChannelEstimator::new(config(re_mask, &[2, 11], FdSmoothing::None));

    let short: Array2<Complex64> = Array2::zeros((24, 13));
    assert_eq!(
        estimator.estimate(short.view(), pilots.view(), 1.0, &hop, None).unwrap_err(),
        PhyError::mismatch("grid symbols", 14, 13)
    );

    let few_pilots: Array3<Complex64> = Array3::zeros((10, 2, 1));
    assert_eq!(
        estimator.estimate(grid.view(), few_pilots.view(), 1.0, &hop, None).unwrap_err(),
        PhyError::mismatch("pilot rows", 12, 10)
    );

    assert!(estimator.estimate(grid.view(), pilots.view(), 0.0, &hop, None).is_err());

    let other_mask = full_hop(2, ReMask::comb(2, 1).unwrap(), &[2, 11]);
    assert!(matches!(
        estimator.estimate(grid.view(), pilots.view(), 1.0, &other_mask, None),
        Err(PhyError::InvalidConfiguration(_))
    ));

    let other_symbols = full_hop(2, re_mask, &[2, 12]);
    assert!(matches!(
        estimator.estimate(grid.view(), pilots.view(), 1.0, &other_symbols, None),
        Err(PhyError::InvalidConfiguration(_))
    ));
}

/// Hops on PRBs 0..10 and 10..20 of a 20-PRB grid, two DM-RS symbols each
fn hopping_pair(re_mask: ReMask) -> (HopConfig, HopConfig) {
    let hop1 = HopConfig::contiguous(20, 0, 10, re_mask, dmrs(&[1, 4]), 0..7).unwrap();
    let hop2 = HopConfig::contiguous(20, 10, 10, re_mask, dmrs(&[8, 11]), 7..14).unwrap();
    (hop1, hop2)
}

#[test]
fn test_hopping_cfo_is_compensated_over_the_slot() {
    let offset = 0.01;
    let gain = Complex64::from_polar(0.8, -1.1);
    let re_mask = ReMask::comb(2, 0).unwrap();
    let (hop1, hop2) = hopping_pair(re_mask);
    let pilots = qpsk_pilots(60, 4, 31);
    let cfg = config(re_mask, &[1, 4, 8, 11], FdSmoothing::Mean);
    let start = cfg.timing.symbol_start_times();
    let grid = received_grid(240, &[&hop1, &hop2], &pilots, 1.0, |_, l| {
        gain * cfo::phase_rotation(offset, start[l])
    });

    let estimate = PortChannelEstimator::new(cfg)
        .estimate(grid.view(), pilots.view(), 1.0, &hop1, Some(&hop2))
        .unwrap();

    let cfo_hz = estimate.cfo_hz.unwrap();
    assert!((cfo_hz - 150.0).abs() < 1e-6, "CFO {} Hz", cfo_hz);
    assert!(estimate.noise_var < 1e-20);
    for (k, l) in [(200, 13), (200, 7), (20, 0), (20, 6)] {
        let truth = gain * cfo::phase_rotation(offset, start[l]);
        assert!((estimate.channel[(k, l, 0)] - truth).norm() < 1e-9, "channel at ({}, {})", k, l);
    }
}

#[test]
fn test_hopping_cfo_is_the_mean_of_both_hops() {
    let (offset1, offset2) = (0.01, 0.02);
    let gain = Complex64::from_polar(1.2, 0.5);
    let re_mask = ReMask::comb(2, 1).unwrap();
    let (hop1, hop2) = hopping_pair(re_mask);
    let pilots = qpsk_pilots(60, 4, 32);
    let cfg = config(re_mask, &[1, 4, 8, 11], FdSmoothing::None);
    let start = cfg.timing.symbol_start_times();
    let grid = received_grid(240, &[&hop1, &hop2], &pilots, 1.0, |k, l| {
        let offset = if k < 120 { offset1 } else { offset2 };
        gain * cfo::phase_rotation(offset, start[l])
    });

    let estimate = PortChannelEstimator::new(cfg)
        .estimate(grid.view(), pilots.view(), 1.0, &hop1, Some(&hop2))
        .unwrap();

    let mean = (offset1 + offset2) / 2.0;
    assert!((estimate.cfo_hz.unwrap() - mean * 15e3).abs() < 1e-6);

    // Each hop is derotated with its own CFO, the merged grid with the mean
    for (k, l) in [(21, 0), (21, 6), (201, 7), (201, 13)] {
        let expected = gain * cfo::phase_rotation(mean, start[l]);
        assert!((estimate.channel[(k, l, 0)] - expected).norm() < 1e-9, "channel at ({}, {})", k, l);
    }
}

#[test]
fn test_hop_with_single_dmrs_uses_the_other_hop_cfo() {
    let offset = 0.008;
    let gain = Complex64::from_polar(0.6, 2.0);
    let re_mask = ReMask::comb(2, 0).unwrap();
    let hop1 = HopConfig::contiguous(20, 0, 10, re_mask, dmrs(&[2, 5]), 0..7).unwrap();
    let hop2 = HopConfig::contiguous(20, 10, 10, re_mask, dmrs(&[9]), 7..14).unwrap();
    let pilots = qpsk_pilots(60, 3, 33);
    let cfg = config(re_mask, &[2, 5, 9], FdSmoothing::Filter);
    let start = cfg.timing.symbol_start_times();
    let grid = received_grid(240, &[&hop1, &hop2], &pilots, 1.0, |_, l| {
        gain * cfo::phase_rotation(offset, start[l])
    });

    let estimate = PortChannelEstimator::new(cfg)
        .estimate(grid.view(), pilots.view(), 1.0, &hop1, Some(&hop2))
        .unwrap();

    assert!((estimate.cfo_hz.unwrap() - offset * 15e3).abs() < 1e-6);
    assert!(estimate.noise_var < 1e-20);
    for (k, l) in [(30, 0), (30, 6), (180, 7), (180, 9), (180, 13)] {
        let truth = gain * cfo::phase_rotation(offset, start[l]);
        assert!((estimate.channel[(k, l, 0)] - truth).norm() < 1e-9, "channel at ({}, {})", k, l);
    }
}

#[test]
fn test_two_layers_share_a_cdm_group() {
    let gains = [Complex64::new(0.7, -0.2), Complex64::new(-0.1, 0.9)];
    let re_mask = ReMask::comb(2, 0).unwrap();
    let hop = full_hop(4, re_mask, &[2, 11]);
    let pilots = layer_pilots(hop.nof_pilot_res(), 2, 2, 41);
    let grid = received_layers(48, &[&hop], &pilots, None, 1.0, |_, _, layer| gains[layer]);

    let estimate = PortChannelEstimator::new(config(re_mask, &[2, 11], FdSmoothing::Mean))
        .estimate(grid.view(), pilots.view(), 1.0, &hop, None)
        .unwrap();

    assert_eq!(estimate.channel.dim(), (48, 14, 2));
    for ((_, _, layer), h) in estimate.channel.indexed_iter() {
        assert!((h - gains[layer]).norm() < 1e-9);
    }
    let rsrp = (gains[0].norm_sqr() + gains[1].norm_sqr()) / 2.0;
    assert!((estimate.rsrp - rsrp).abs() < 1e-9);
    assert!(estimate.noise_var < 1e-20);
    assert!(estimate.cfo_hz.unwrap().abs() < 1e-9);
}

#[test]
fn test_four_layers_use_both_cdm_groups() {
    let gains = [
        Complex64::new(0.7, -0.2),
        Complex64::new(-0.1, 0.9),
        Complex64::new(0.3, 0.3),
        Complex64::new(-0.5, -0.4),
    ];
    let re_mask = ReMask::comb(2, 0).unwrap();
    let second = ReMask::comb(2, 1).unwrap();
    let hop = full_hop(2, re_mask, &[3, 10]);
    let pilots = layer_pilots(hop.nof_pilot_res(), 2, 4, 42);
    let mut grid = received_layers(24, &[&hop], &pilots, Some(second), 2.0, |_, _, layer| gains[layer]);

    let mut cfg = config(re_mask, &[3, 10], FdSmoothing::Filter);
    cfg.second_cdm_re_mask = Some(second);
    let estimator = PortChannelEstimator::new(cfg);
    let estimate = estimator.estimate(grid.view(), pilots.view(), 2.0, &hop, None).unwrap();

    assert_eq!(estimate.nof_layers(), 4);
    for (layer, gain) in gains.iter().enumerate() {
        assert!((estimate.channel[(0, 0, layer)] - gain).norm() < 1e-9);
        assert!((estimate.channel[(23, 13, layer)] - gain).norm() < 1e-9);
    }

    // Every pilot RE of both groups counts towards EPRE
    grid.mapv_inplace(|y| y * 2.0);
    let louder = estimator.estimate(grid.view(), pilots.view(), 2.0, &hop, None).unwrap();
    assert!((louder.epre / estimate.epre - 4.0).abs() < 1e-9);
}

#[test]
fn test_layer_count_is_checked() {
    let re_mask = ReMask::comb(2, 0).unwrap();
    let hop = full_hop(2, re_mask, &[2, 11]);
    let grid: Array2<Complex64> = Array2::zeros((24, 14));
    let mut cfg = config(re_mask, &[2, 11], FdSmoothing::None);

    let three = layer_pilots(12, 2, 3, 1);
    assert!(matches!(
        PortChannelEstimator::new(cfg.clone()).estimate(grid.view(), three.view(), 1.0, &hop, None),
        Err(PhyError::InvalidConfiguration(_))
    ));

    cfg.second_cdm_re_mask = Some(re_mask);
    assert!(matches!(
        PortChannelEstimator::new(cfg.clone()).estimate(grid.view(), three.view(), 1.0, &hop, None),
        Err(PhyError::InvalidConfiguration(_))
    ));

    cfg.second_cdm_re_mask = Some(ReMask::comb(2, 1).unwrap());
    let five = layer_pilots(12, 2, 5, 1);
    assert!(matches!(
        PortChannelEstimator::new(cfg.clone()).estimate(grid.view(), five.view(), 1.0, &hop, None),
        Err(PhyError::InvalidConfiguration(_))
    ));
    let none: Array3<Complex64> = Array3::zeros((12, 2, 0));
    assert!(PortChannelEstimator::new(cfg)
        .estimate(grid.view(), none.view(), 1.0, &hop, None)
        .is_err());
}

#[test]
fn test_time_interpolation_follows_a_linear_channel() {
    let offset = Complex64::new(0.4, -0.3);
    let slope = Complex64::new(0.02, 0.05);
    let re_mask = ReMask::comb(2, 0).unwrap();
    let hop = full_hop(2, re_mask, &[2, 11]);
    let pilots = qpsk_pilots(hop.nof_pilot_res(), 2, 51);
    let grid = received_grid(24, &[&hop], &pilots, 1.0, |_, l| offset + slope * l as f64);

    let mut cfg = config(re_mask, &[2, 11], FdSmoothing::None);
    cfg.compensate_cfo = false;
    cfg.td_interpolation = TdInterpolation::Interpolate;
    let estimate = PortChannelEstimator::new(cfg.clone())
        .estimate(grid.view(), pilots.view(), 1.0, &hop, None)
        .unwrap();

    assert!(estimate.noise_var < 1e-20);
    for k in [0, 5, 23] {
        for l in 2..=11 {
            let truth = offset + slope * l as f64;
            assert!((estimate.channel[(k, l, 0)] - truth).norm() < 1e-12, "channel at ({}, {})", k, l);
        }
        // Held beyond the outer DM-RS symbols
        assert!((estimate.channel[(k, 0, 0)] - (offset + slope * 2.0)).norm() < 1e-12);
        assert!((estimate.channel[(k, 13, 0)] - (offset + slope * 11.0)).norm() < 1e-12);
    }

    // Averaging holds the mid-point value over the hop
    cfg.td_interpolation = TdInterpolation::Average;
    let averaged = PortChannelEstimator::new(cfg)
        .estimate(grid.view(), pilots.view(), 1.0, &hop, None)
        .unwrap();
    let mid = offset + slope * 6.5;
    assert!(averaged.channel.iter().all(|h| (h - mid).norm() < 1e-12));
    assert!(averaged.noise_var > 0.0);
}

#[test]
fn test_interpolation_strategy_names() {
    assert_eq!(TdInterpolation::default(), TdInterpolation::Average);
    assert_eq!("interpolate".parse::<TdInterpolation>().unwrap(), TdInterpolation::Interpolate);
    assert_eq!(TdInterpolation::Average.to_string(), "average");
    assert_eq!(
        "spline".parse::<TdInterpolation>().unwrap_err(),
        PhyError::UnknownInterpolationStrategy("spline".to_string())
    );
}
