use std::collections::HashMap;

use approx::assert_relative_eq;
use panel_optimizer::cuts::{CutAxis, CutStep};
use panel_optimizer::packer::{ColumnVariant, FitHeuristic, StripDirection};
use panel_optimizer::{
    Grain, Issue, Layout, OptimizationMode, PanelRequest, Settings, SheetResult, StockSheetSpec,
    Strategy, optimize,
};

fn assert_layout_valid(layout: &Layout, requests: &[PanelRequest]) {
    let kerf = layout.kerf;
    for sheet in &layout.sheets {
        for p in &sheet.panels {
            assert!(
                p.right() <= sheet.width && p.bottom() <= sheet.height,
                "{} leaves sheet {}",
                p.instance_id,
                sheet.id
            );
        }
        for (i, a) in sheet.panels.iter().enumerate() {
            for b in &sheet.panels[i + 1..] {
                let apart = a.right() + kerf <= b.x
                    || b.right() + kerf <= a.x
                    || a.bottom() + kerf <= b.y
                    || b.bottom() + kerf <= a.y;
                assert!(apart, "{} and {} overlap on {}", a.instance_id, b.instance_id, sheet.id);
            }
        }
        assert!((0.0..=1.0).contains(&sheet.efficiency));
        let used: u64 = sheet.panels.iter().map(|p| p.area()).sum();
        assert_eq!(used, sheet.used_area);
        assert_relative_eq!(
            sheet.efficiency,
            used as f64 / (sheet.width as f64 * sheet.height as f64),
            epsilon = 1e-12
        );
    }

    // Every expanded instance appears exactly once, placed or unplaced
    let mut seen: HashMap<String, usize> = HashMap::new();
    for p in layout.sheets.iter().flat_map(|s| &s.panels) {
        *seen.entry(p.instance_id.clone()).or_default() += 1;
    }
    for u in &layout.unplaced {
        *seen.entry(u.id.clone()).or_default() += 1;
    }
    let expected: usize = requests.iter().map(|r| r.quantity as usize).sum();
    assert_eq!(seen.len(), expected);
    assert!(seen.values().all(|&n| n == 1));

    let locked: Vec<&str> = requests
        .iter()
        .filter(|r| r.grain != Grain::None)
        .map(|r| r.id.as_str())
        .collect();
    for p in layout.sheets.iter().flat_map(|s| &s.panels) {
        if locked.contains(&p.request_id.as_str()) {
            assert!(!p.rotated, "{} has locked grain but was rotated", p.instance_id);
        }
    }
}

/// Every panel edge off the sheet border must lie on a cut that spans it.
fn assert_cuts_cover(sheet: &SheetResult, cuts: &[CutStep], kerf: u32) {
    let covered = |axis: CutAxis, position: u32, from: u32, to: u32| {
        cuts.iter().any(|c| {
            c.sheet_id == sheet.id
                && c.axis == axis
                && c.position == position
                && c.span_start <= from
                && c.span_end >= to
        })
    };
    for p in &sheet.panels {
        let edges = [
            (CutAxis::Y, p.y, p.y > kerf, p.x, p.right()),
            (CutAxis::Y, p.bottom(), p.bottom() + kerf < sheet.height, p.x, p.right()),
            (CutAxis::X, p.x, p.x > kerf, p.y, p.bottom()),
            (CutAxis::X, p.right(), p.right() + kerf < sheet.width, p.y, p.bottom()),
        ];
        for (axis, position, interior, from, to) in edges {
            if interior {
                assert!(
                    covered(axis, position, from, to),
                    "{:?} edge at {} of {} not cut on {}",
                    axis,
                    position,
                    p.instance_id,
                    sheet.id
                );
            }
        }
    }
}

fn assert_no_cut_crosses_panel(sheet: &SheetResult, cuts: &[CutStep]) {
    for cut in cuts.iter().filter(|c| c.sheet_id == sheet.id) {
        for p in &sheet.panels {
            let (across, along) = match cut.axis {
                CutAxis::X => ((p.x, p.right()), (p.y, p.bottom())),
                CutAxis::Y => ((p.y, p.bottom()), (p.x, p.right())),
            };
            let inside = across.0 < cut.position && cut.position < across.1;
            let overlaps = cut.span_start < along.1 && along.0 < cut.span_end;
            assert!(
                !(inside && overlaps),
                "cut {} {:?}={} [{}..{}] runs through {} on {}",
                cut.seq,
                cut.axis,
                cut.position,
                cut.span_start,
                cut.span_end,
                p.instance_id,
                sheet.id
            );
        }
    }
}

/// Replays the cuts in order on the bare sheet. Every cut must run edge to
/// edge through one remaining piece, and every panel must end up alone in a
/// piece at most a kerf larger on each side.
fn assert_guillotine_replay(sheet: &SheetResult, cuts: &[CutStep], kerf: u32) {
    // (x0, x1, y0, y1)
    let mut pieces = vec![(0, sheet.width, 0, sheet.height)];
    for cut in cuts.iter().filter(|c| c.sheet_id == sheet.id) {
        let found = pieces.iter().position(|&(x0, x1, y0, y1)| match cut.axis {
            CutAxis::X => (y0, y1) == (cut.span_start, cut.span_end) && x0 < cut.position && cut.position < x1,
            CutAxis::Y => (x0, x1) == (cut.span_start, cut.span_end) && y0 < cut.position && cut.position < y1,
        });
        let Some(idx) = found else {
            panic!(
                "cut {} {:?}={} [{}..{}] does not split a whole piece on {}",
                cut.seq, cut.axis, cut.position, cut.span_start, cut.span_end, sheet.id
            );
        };
        let (x0, x1, y0, y1) = pieces.swap_remove(idx);
        match cut.axis {
            CutAxis::X => pieces.extend([(x0, cut.position, y0, y1), (cut.position, x1, y0, y1)]),
            CutAxis::Y => pieces.extend([(x0, x1, y0, cut.position), (x0, x1, cut.position, y1)]),
        }
    }

    for &(x0, x1, y0, y1) in &pieces {
        let inside: Vec<_> = sheet
            .panels
            .iter()
            .filter(|p| p.x < x1 && x0 < p.right() && p.y < y1 && y0 < p.bottom())
            .collect();
        assert!(inside.len() <= 1, "piece [{x0}..{x1}]x[{y0}..{y1}] holds {} panels", inside.len());
        if let Some(p) = inside.first() {
            assert!(
                x0 <= p.x && p.right() <= x1 && y0 <= p.y && p.bottom() <= y1,
                "{} is not contained in its piece",
                p.instance_id
            );
            let slack = [p.x - x0, x1 - p.right(), p.y - y0, y1 - p.bottom()];
            assert!(
                slack.iter().all(|&s| s <= kerf),
                "{} still needs trimming: {:?}",
                p.instance_id,
                slack
            );
        }
    }
}

fn cut_lines(cuts: &[CutStep]) -> Vec<(CutAxis, u32, u32, u32)> {
    cuts.iter()
        .map(|c| (c.axis, c.position, c.span_start, c.span_end))
        .collect()
}

fn cabinet_job() -> Vec<PanelRequest> {
    vec![
        PanelRequest::new("side", 720, 560).with_quantity(4).with_grain(Grain::LockedToHeight),
        PanelRequest::new("shelf", 764, 540).with_quantity(6),
        PanelRequest::new("top", 800, 580).with_quantity(2),
        PanelRequest::new("door", 396, 716).with_quantity(4).with_grain(Grain::LockedToWidth),
        PanelRequest::new("plinth", 764, 100).with_quantity(3),
        PanelRequest::new("drawer", 450, 140).with_quantity(8),
    ]
}

fn all_strategies() -> Vec<(OptimizationMode, Strategy)> {
    vec![
        (OptimizationMode::Nesting, Strategy::BottomLeft),
        (
            OptimizationMode::Nesting,
            Strategy::BestAreaFit {
                heuristic: FitHeuristic::BestAreaFit,
            },
        ),
        (
            OptimizationMode::Nesting,
            Strategy::BestAreaFit {
                heuristic: FitHeuristic::BestShortSideFit,
            },
        ),
        (
            OptimizationMode::RipFirst,
            Strategy::GuillotineStrip {
                direction: StripDirection::Horizontal,
            },
        ),
        (
            OptimizationMode::RipFirst,
            Strategy::GuillotineStrip {
                direction: StripDirection::Vertical,
            },
        ),
        (
            OptimizationMode::RipFirst,
            Strategy::GuillotineStrip {
                direction: StripDirection::Auto,
            },
        ),
        (
            OptimizationMode::RipFirst,
            Strategy::Column {
                variant: ColumnVariant::Rip,
            },
        ),
        (
            OptimizationMode::RipFirst,
            Strategy::Column {
                variant: ColumnVariant::Cutsaw,
            },
        ),
    ]
}

#[test]
fn test_mixed_set_best_fit_not_worse_than_bottom_left() {
    let requests = vec![
        PanelRequest::new("a", 600, 800).with_quantity(4),
        PanelRequest::new("b", 400, 500).with_quantity(5),
        PanelRequest::new("c", 800, 300).with_quantity(3),
        PanelRequest::new("d", 350, 450).with_quantity(4),
    ];
    let stock = [StockSheetSpec::new("board", 2440, 1220).with_available(3)];
    let run = |strategy| {
        let settings = Settings {
            kerf: 3,
            strategy: Some(strategy),
            parallel: false,
            ..Default::default()
        };
        optimize(&requests, &stock, &settings, None).unwrap()
    };

    let best_fit = run(Strategy::BestAreaFit {
        heuristic: FitHeuristic::BestAreaFit,
    });
    let bottom_left = run(Strategy::BottomLeft);

    for layout in [&best_fit, &bottom_left] {
        assert_layout_valid(layout, &requests);
        assert!(layout.sheet_count() <= 3);
        assert_eq!(layout.placed_count(), 16);
        assert!(layout.unplaced.is_empty());
        assert!(layout.issues.is_empty());
    }
    assert!(best_fit.total_efficiency() + 1e-9 >= bottom_left.total_efficiency());
}

#[test]
fn test_oversized_panel_reported() {
    let requests = vec![PanelRequest::new("rail", 3000, 100).with_rotation(false)];
    let stock = [StockSheetSpec::new("board", 2440, 1220)];
    let layout = optimize(&requests, &stock, &Settings::default(), None).unwrap();

    assert!(layout.sheets.is_empty());
    assert_eq!(layout.unplaced.len(), 1);
    assert_eq!(
        layout.issues,
        vec![Issue::Oversized {
            group: "18".into(),
            instance_id: "rail-0".into(),
            width: 3000,
            height: 100,
            sheet_width: 2440,
            sheet_height: 1220,
        }]
    );
}

#[test]
fn test_single_strip_four_cuts() {
    let requests = vec![
        PanelRequest::new("left", 600, 800),
        PanelRequest::new("right", 700, 800),
    ];
    let stock = [StockSheetSpec::new("board", 2440, 1220)];
    let settings = Settings {
        kerf: 3,
        mode: OptimizationMode::RipFirst,
        strategy: Some(Strategy::GuillotineStrip {
            direction: StripDirection::Horizontal,
        }),
        ..Default::default()
    };
    let layout = optimize(&requests, &stock, &settings, None).unwrap();
    assert_layout_valid(&layout, &requests);
    assert_eq!(layout.sheet_count(), 1);

    let sheet = &layout.sheets[0];
    assert_eq!(sheet.panels.len(), 2);
    assert!(sheet.panels.iter().all(|p| p.y == 0 && !p.rotated));

    let cuts = layout.cut_plan();
    let lines: Vec<(CutAxis, u32, u32)> = cuts
        .iter()
        .map(|c| (c.axis, c.position, c.length()))
        .collect();
    // Crosscuts stop at the strip, the offcut below is left whole
    assert_eq!(
        lines,
        vec![
            (CutAxis::Y, 800, 2440),
            (CutAxis::X, 700, 800),
            (CutAxis::X, 703, 800),
            (CutAxis::X, 1303, 800),
        ]
    );
    assert_cuts_cover(sheet, &cuts, 3);
    assert_guillotine_replay(sheet, &cuts, 3);

    let saw = layout.saw_stats();
    assert_eq!(saw.total_cuts, 4);
    assert_eq!(saw.total, 2440 + 3 * 800);
}

#[test]
fn test_two_strips_cut_separately() {
    let requests = vec![
        PanelRequest::new("a", 600, 800),
        PanelRequest::new("b", 700, 800),
        PanelRequest::new("c", 1000, 300),
    ];
    let stock = [StockSheetSpec::new("board", 2440, 1220)];
    let settings = Settings {
        kerf: 3,
        mode: OptimizationMode::RipFirst,
        strategy: Some(Strategy::GuillotineStrip {
            direction: StripDirection::Horizontal,
        }),
        allow_rotation: false,
        parallel: false,
        ..Default::default()
    };
    let layout = optimize(&requests, &stock, &settings, None).unwrap();
    assert_layout_valid(&layout, &requests);
    assert_eq!(layout.sheet_count(), 1);

    let sheet = &layout.sheets[0];
    let at = |id: &str| {
        let p = sheet.panels.iter().find(|p| p.request_id == id).unwrap();
        (p.x, p.y)
    };
    assert_eq!((at("b"), at("a"), at("c")), ((0, 0), (703, 0), (0, 803)));

    let cuts = layout.cut_plan();
    assert_eq!(
        cut_lines(&cuts),
        vec![
            (CutAxis::Y, 800, 0, 2440),
            (CutAxis::Y, 803, 0, 2440),
            (CutAxis::Y, 1103, 0, 2440),
            (CutAxis::X, 700, 0, 800),
            (CutAxis::X, 703, 0, 800),
            (CutAxis::X, 1303, 0, 800),
            (CutAxis::X, 1000, 803, 1103),
        ]
    );
    assert_no_cut_crosses_panel(sheet, &cuts);
    assert_cuts_cover(sheet, &cuts, 3);
    assert_guillotine_replay(sheet, &cuts, 3);
    assert_eq!(layout.saw_stats().total, 3 * 2440 + 3 * 800 + 300);
}

#[test]
fn test_columns_cut_rip_first() {
    let requests = vec![
        PanelRequest::new("wide", 600, 500),
        PanelRequest::new("narrow", 400, 300),
        PanelRequest::new("square", 500, 500),
    ];
    let stock = [StockSheetSpec::new("board", 2000, 1000)];
    let settings = Settings {
        kerf: 3,
        mode: OptimizationMode::RipFirst,
        strategy: Some(Strategy::Column {
            variant: ColumnVariant::Rip,
        }),
        allow_rotation: false,
        parallel: false,
        ..Default::default()
    };
    let layout = optimize(&requests, &stock, &settings, None).unwrap();
    assert_layout_valid(&layout, &requests);

    let sheet = &layout.sheets[0];
    let at = |id: &str| {
        let p = sheet.panels.iter().find(|p| p.request_id == id).unwrap();
        (p.x, p.y)
    };
    assert_eq!((at("square"), at("wide"), at("narrow")), ((0, 0), (503, 0), (0, 503)));

    let cuts = layout.cut_plan();
    assert_eq!(
        cut_lines(&cuts),
        vec![
            (CutAxis::X, 500, 0, 1000),
            (CutAxis::X, 503, 0, 1000),
            (CutAxis::X, 1103, 0, 1000),
            (CutAxis::Y, 500, 0, 500),
            (CutAxis::Y, 503, 0, 500),
            (CutAxis::Y, 803, 0, 500),
            (CutAxis::Y, 500, 503, 1103),
            (CutAxis::X, 400, 503, 803),
        ]
    );
    assert_no_cut_crosses_panel(sheet, &cuts);
    assert_guillotine_replay(sheet, &cuts, 3);
}

#[test]
fn test_every_strategy_keeps_invariants() {
    let requests = cabinet_job();
    let stock = [StockSheetSpec::new("board", 2800, 2070)];
    for (mode, strategy) in all_strategies() {
        let settings = Settings {
            kerf: 4,
            mode,
            strategy: Some(strategy),
            ..Default::default()
        };
        let layout = optimize(&requests, &stock, &settings, None).unwrap();
        assert_layout_valid(&layout, &requests);
        assert!(layout.unplaced.is_empty(), "{strategy} left panels unplaced");

        let cuts = layout.cut_plan();
        for sheet in &layout.sheets {
            assert_cuts_cover(sheet, &cuts, settings.kerf);
            assert_no_cut_crosses_panel(sheet, &cuts);
            if mode == OptimizationMode::RipFirst {
                assert_guillotine_replay(sheet, &cuts, settings.kerf);
            }
        }
        let stats = layout.saw_stats();
        assert_eq!(stats.total_cuts, cuts.len());
        let sheets_with_cuts = layout
            .sheets
            .iter()
            .filter(|s| cuts.iter().any(|c| c.sheet_id == s.id))
            .count();
        assert_eq!(stats.sheets.len(), sheets_with_cuts);
    }
}

#[test]
fn test_parallel_matches_sequential() {
    let mut requests = cabinet_job();
    for r in requests.iter_mut().take(3) {
        r.material = Some("MDF".into());
    }
    let stock = [
        StockSheetSpec::new("pb", 2800, 2070).with_material("PB"),
        StockSheetSpec::new("mdf", 2800, 2070).with_material("MDF"),
    ];
    let run = |parallel| {
        let settings = Settings {
            parallel,
            ..Default::default()
        };
        let layout = optimize(&requests, &stock, &settings, None).unwrap();
        serde_json::to_string(&layout).unwrap()
    };
    assert_eq!(run(true), run(false));
}

#[test]
fn test_trim_and_stock_coordinates() {
    let requests = vec![PanelRequest::new("a", 500, 500)];
    let stock = [StockSheetSpec::new("board", 2440, 1220)];
    let settings = Settings {
        trim: panel_optimizer::TrimMargins {
            top: 15,
            bottom: 5,
            left: 10,
            right: 10,
        },
        ..Default::default()
    };
    let layout = optimize(&requests, &stock, &settings, None).unwrap();
    let sheet = &layout.sheets[0];
    assert_eq!((sheet.width, sheet.height), (2420, 1200));
    assert_eq!(sheet.to_stock_coords(&sheet.panels[0]), (10, 15));
}

#[test]
fn test_job_file_round_trip() {
    let json = r#"{
        "panels": [
            {"id": "side", "width": 720, "height": 560, "quantity": 2, "grain": "locked-to-height"},
            {"id": "shelf", "width": 764.0, "height": 300, "quantity": 3}
        ],
        "stock": [{"id": "pb", "width": 2800, "height": 2070, "available": 2}],
        "settings": {"kerf": 4, "mode": "rip-first", "strategy": {"kind": "column", "variant": "cutsaw"}}
    }"#;
    let job: panel_optimizer::Job = serde_json::from_str(json).unwrap();
    let layout = job.run(None).unwrap();
    assert_layout_valid(&layout, &job.panels);
    assert_eq!(layout.placed_count(), 5);
    assert!(matches!(
        layout.cut_style,
        panel_optimizer::CutStyle::Guillotine {
            first_axis: CutAxis::X
        }
    ));
}
