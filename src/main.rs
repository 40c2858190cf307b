use std::path::PathBuf;

use clap::Parser;
use panel_optimizer::{
    Job, Layout, OptimizationMode, PanelRequest, Rect, Settings, StockSheetSpec, Strategy,
    TrimMargins,
};
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "panel_optimizer",
    about = "Panel cutting optimizer for furniture stock sheets"
)]
struct Cli {
    /// Job file with panels, stock and settings (JSON)
    #[arg(long, conflicts_with_all = ["stock", "panels"])]
    job: Option<PathBuf>,

    /// Stock sheet as WxH or WxH:count (e.g. 2800x2070:4)
    #[arg(long, required_unless_present = "job")]
    stock: Option<String>,

    /// Panels as WxH:qty (e.g. 720x560:4 764x300:6)
    #[arg(long, num_args = 1.., required_unless_present = "job")]
    panels: Vec<String>,

    /// Blade kerf width in mm
    #[arg(long)]
    kerf: Option<u32>,

    /// nesting or rip-first
    #[arg(long)]
    mode: Option<OptimizationMode>,

    /// Packing strategy (bottom-left, best-area-fit, strip-auto, column, cutsaw, ...)
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Disable panel rotation
    #[arg(long)]
    no_rotate: bool,

    /// Trim margins as T,B,L,R or a single value for all edges
    #[arg(long, value_parser = parse_trim)]
    trim: Option<TrimMargins>,

    /// Print the cut sequence of each sheet
    #[arg(long)]
    cuts: bool,

    /// Print the full layout as JSON
    #[arg(long)]
    json: bool,

    /// Log allocation details to stderr
    #[arg(long, short)]
    verbose: bool,
}

fn parse_trim(s: &str) -> Result<TrimMargins, String> {
    let values = s
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| format!("invalid trim value in '{}'", s))
        })
        .collect::<Result<Vec<_>, _>>()?;
    match values[..] {
        [all] => Ok(TrimMargins::uniform(all)),
        [top, bottom, left, right] => Ok(TrimMargins {
            top,
            bottom,
            left,
            right,
        }),
        _ => Err(format!("invalid trim '{}', expected T,B,L,R", s)),
    }
}

fn parse_dimensions(s: &str) -> Result<Rect, String> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(format!("invalid dimensions '{}', expected WxH", s));
    }
    let width = parts[0]
        .parse::<u32>()
        .map_err(|_| format!("invalid width in '{}'", s))?;
    let height = parts[1]
        .parse::<u32>()
        .map_err(|_| format!("invalid height in '{}'", s))?;
    if width == 0 || height == 0 {
        return Err(format!("dimensions must be non-zero in '{}'", s));
    }
    Ok(Rect::new(width, height))
}

fn parse_stock(s: &str) -> Result<StockSheetSpec, String> {
    let (dims, count) = match s.split_once(':') {
        Some((dims, count)) => {
            let count = count
                .parse::<u32>()
                .map_err(|_| format!("invalid sheet count in '{}'", s))?;
            (dims, Some(count))
        }
        None => (s, None),
    };
    let rect = parse_dimensions(dims)?;
    let mut spec = StockSheetSpec::new("stock", rect.w, rect.h);
    spec.available = count;
    Ok(spec)
}

fn parse_panel(index: usize, s: &str) -> Result<PanelRequest, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 {
        return Err(format!("invalid panel '{}', expected WxH:qty", s));
    }
    let rect = parse_dimensions(parts[0])?;
    let qty = parts[1]
        .parse::<u32>()
        .map_err(|_| format!("invalid quantity in '{}'", s))?;
    if qty == 0 {
        return Err(format!("quantity must be non-zero in '{}'", s));
    }
    Ok(PanelRequest::new(format!("p{}", index + 1), rect.w, rect.h).with_quantity(qty))
}

fn load_job(cli: &Cli) -> Result<Job, String> {
    let mut job = match &cli.job {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            serde_json::from_str::<Job>(&text)
                .map_err(|e| format!("invalid job file {}: {}", path.display(), e))?
        }
        None => {
            let stock = parse_stock(cli.stock.as_deref().unwrap_or_default())?;
            let panels = cli
                .panels
                .iter()
                .enumerate()
                .map(|(i, p)| parse_panel(i, p))
                .collect::<Result<Vec<_>, _>>()?;
            Job {
                panels,
                stock: vec![stock],
                settings: Settings::default(),
            }
        }
    };

    let settings = &mut job.settings;
    if let Some(kerf) = cli.kerf {
        settings.kerf = kerf;
    }
    if let Some(mode) = cli.mode {
        settings.mode = mode;
    }
    if let Some(strategy) = cli.strategy {
        settings.strategy = Some(strategy);
    }
    if let Some(trim) = cli.trim {
        settings.trim = trim;
    }
    if cli.no_rotate {
        settings.allow_rotation = false;
    }
    Ok(job)
}

fn print_layout(layout: &Layout, show_cuts: bool) {
    for sheet in &layout.sheets {
        println!(
            "Sheet {} ({} {}, {:.1}% used, {} mm2 waste):",
            sheet.id,
            sheet.stock_id,
            sheet.size(),
            sheet.efficiency * 100.0,
            sheet.waste_area()
        );
        for p in &sheet.panels {
            let rot = if p.rotated { " [rotated]" } else { "" };
            println!("  {} {} @ ({}, {}){}", p.instance_id, p.footprint(), p.x, p.y, rot);
        }
        if show_cuts {
            for cut in layout.sheet_cuts(sheet) {
                let yields = cut
                    .yields_panel
                    .as_deref()
                    .map(|id| format!(" -> {id}"))
                    .unwrap_or_default();
                println!(
                    "  cut {:>3}: {:?}={} [{}..{}]{}",
                    cut.seq, cut.axis, cut.position, cut.span_start, cut.span_end, yields
                );
            }
        }
        println!();
    }

    for issue in &layout.issues {
        println!("Warning: {}", issue);
    }

    println!(
        "Summary: {} sheet{} used, {} panel{} placed, {} unplaced, {:.1}% waste",
        layout.sheet_count(),
        if layout.sheet_count() == 1 { "" } else { "s" },
        layout.placed_count(),
        if layout.placed_count() == 1 { "" } else { "s" },
        layout.unplaced.len(),
        layout.total_waste_percent(),
    );
    if show_cuts {
        let stats = layout.saw_stats();
        println!("Saw: {} cuts, {} mm total", stats.total_cuts, stats.total);
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    let job = load_job(&cli).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    let layout = job.run(None).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    if cli.json {
        #[derive(serde::Serialize)]
        struct Output<'a> {
            #[serde(flatten)]
            layout: &'a Layout,
            cuts: Vec<panel_optimizer::CutStep>,
            saw: panel_optimizer::SawStats,
        }
        let output = Output {
            layout: &layout,
            cuts: layout.cut_plan(),
            saw: layout.saw_stats(),
        };
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    print_layout(&layout, cli.cuts);
}
