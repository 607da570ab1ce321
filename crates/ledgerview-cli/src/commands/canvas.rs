//! Canvas command - paint pixels on a shared canvas.

use anyhow::{Context, Result};
use clap::Args;
use ledgerview_core::Address;
use ledgerview_engine::domains::canvas::{CanvasDomain, Color, Coord, Pixel};
use ledgerview_engine::Provenance;

use crate::session::{
    print_submissions, provenance_json, provenance_label, CycleTally, Session, SubmissionRow,
};
use crate::{parse_address, Config, OutputFormat};

/// Arguments for the canvas command.
#[derive(Debug, Args)]
pub struct CanvasArgs {
    /// Canvas contract address.
    #[arg(long, default_value = "0xc4a1a5", value_parser = parse_address)]
    pub contract: Address,

    /// Canvas width in pixels.
    #[arg(long, default_value_t = 16)]
    pub width: u32,

    /// Canvas height in pixels.
    #[arg(long, default_value_t = 16)]
    pub height: u32,

    /// Pixels to paint, as `x,y=#rrggbb` (repeatable).
    #[arg(long = "paint", short = 'p', value_parser = parse_paint)]
    pub paints: Vec<Paint>,

    /// Pixels the neighbor paints before the session's own writes.
    #[arg(long = "foreign-paint", value_parser = parse_paint)]
    pub foreign_paints: Vec<Paint>,

    /// Print every row of the canvas instead of painted pixels only.
    #[arg(long)]
    pub grid: bool,
}

/// One paint request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paint {
    /// Target pixel.
    pub coord: Coord,
    /// New color.
    pub color: Color,
}

/// Parses `x,y=#color`.
fn parse_paint(value: &str) -> std::result::Result<Paint, String> {
    let (at, color) = value
        .split_once('=')
        .ok_or_else(|| format!("expected x,y=#color, got '{value}'"))?;
    let (x, y) = at
        .split_once(',')
        .ok_or_else(|| format!("expected x,y before '=', got '{at}'"))?;
    let x = x
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid x '{x}': {e}"))?;
    let y = y
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid y '{y}': {e}"))?;
    let color = Color::new(color.trim()).map_err(|e| e.to_string())?;
    Ok(Paint {
        coord: Coord::new(x, y),
        color,
    })
}

/// A painted pixel in the merged view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelRow {
    /// Pixel position.
    pub coord: Coord,
    /// Visible pixel.
    pub pixel: Pixel,
    /// Where the pixel came from.
    pub provenance: Provenance,
}

/// Outcome of a canvas session.
#[derive(Debug, Clone)]
pub struct CanvasReport {
    /// Canvas width.
    pub width: u32,
    /// Canvas height.
    pub height: u32,
    /// Painted pixels, row-major.
    pub pixels: Vec<PixelRow>,
    /// Full rendering, when requested.
    pub grid: Option<Vec<Vec<Color>>>,
    /// The session's own paints.
    pub submissions: Vec<SubmissionRow>,
    /// Cycle totals.
    pub tally: CycleTally,
    /// Ledger head when the session ended.
    pub head: u64,
}

/// Runs a canvas session and returns what it saw.
///
/// # Errors
///
/// Returns an error if the canvas dimensions are invalid or a paint is
/// rejected.
pub async fn run(args: &CanvasArgs, config: &Config) -> Result<CanvasReport> {
    let domain = CanvasDomain::new(args.contract.clone(), args.width, args.height)
        .context("Invalid canvas")?;
    let shape = domain.shape();
    let session = Session::open(domain, args.contract.clone(), shape, config)?;

    for paint in &args.foreign_paints {
        let pixel = Pixel::new(paint.color.clone(), config.neighbor.clone());
        session.inject_foreign(&paint.coord, &pixel, &config.neighbor)?;
    }

    session.sync().await;
    let mut submitted = Vec::with_capacity(args.paints.len());
    for paint in &args.paints {
        let pixel = Pixel::new(paint.color.clone(), config.account.clone());
        let local_id = session
            .engine()
            .submit(paint.coord, pixel)
            .with_context(|| format!("Failed to paint {}", paint.coord))?;
        submitted.push((local_id, format!("paint {} {}", paint.coord, paint.color)));
    }

    let tally = session.run_cycles().await;

    let view = session.engine().merged_view();
    let pixels = view
        .iter()
        .map(|(coord, cell)| PixelRow {
            coord: *coord,
            pixel: cell.value.clone(),
            provenance: cell.provenance,
        })
        .collect();
    let grid = args.grid.then(|| session.engine().domain().render(&view));
    let report = CanvasReport {
        width: args.width,
        height: args.height,
        pixels,
        grid,
        submissions: session.submission_rows(submitted),
        tally,
        head: session.head(),
    };

    session.close().await?;
    Ok(report)
}

/// Execute the canvas command.
///
/// # Errors
///
/// Returns an error if the session fails or the output cannot be serialized.
pub async fn execute(args: CanvasArgs, config: &Config) -> Result<()> {
    let report = run(&args, config).await?;

    match config.format {
        OutputFormat::Json => {
            let pixels: Vec<_> = report
                .pixels
                .iter()
                .map(|row| {
                    serde_json::json!({
                        "x": row.coord.x,
                        "y": row.coord.y,
                        "color": row.pixel.color.as_str(),
                        "painter": row.pixel.painter.as_str(),
                        "provenance": provenance_json(&row.provenance),
                    })
                })
                .collect();
            let submissions: Vec<_> = report.submissions.iter().map(SubmissionRow::to_json).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "width": report.width,
                    "height": report.height,
                    "head": report.head,
                    "pixels": pixels,
                    "grid": report.grid,
                    "submissions": submissions,
                    "cyclesApplied": report.tally.applied,
                    "cyclesFailed": report.tally.failed,
                }))
                .context("Failed to serialize canvas")?
            );
        }
        OutputFormat::Text => {
            println!(
                "Canvas {}x{} at block {} ({} cycles applied)",
                report.width, report.height, report.head, report.tally.applied
            );
            println!();
            if report.pixels.is_empty() {
                println!("  (blank)");
            }
            for row in &report.pixels {
                println!(
                    "  {:<10} {}  {:<12} {}",
                    row.coord.to_string(),
                    row.pixel.color,
                    row.pixel.painter.as_str(),
                    provenance_label(&row.provenance)
                );
            }
            if let Some(grid) = &report.grid {
                println!();
                for line in grid {
                    let cells: Vec<&str> = line.iter().map(Color::as_str).collect();
                    println!("  {}", cells.join(" "));
                }
            }
            print_submissions(&report.submissions);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use clap::Parser;
    use ledgerview_engine::EngineConfig;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: CanvasArgs,
    }

    fn config() -> Config {
        Config {
            account: Address::new("0xa11ce").unwrap(),
            neighbor: Address::new("0xb0b").unwrap(),
            block_interval: Duration::from_millis(100),
            cycles: 3,
            engine: EngineConfig::default(),
            format: OutputFormat::Text,
        }
    }

    #[test]
    fn test_parse_paint() {
        let paint = parse_paint("3, 4=#FF0000").unwrap();
        assert_eq!(paint.coord, Coord::new(3, 4));
        assert_eq!(paint.color.as_str(), "#ff0000");

        assert!(parse_paint("3,4").is_err());
        assert!(parse_paint("3=#fff").is_err());
        assert!(parse_paint("x,4=#fff").is_err());
        assert!(parse_paint("3,4=red").is_err());
    }

    #[test]
    fn test_canvas_args_parsing() {
        let cli = TestCli::parse_from([
            "test",
            "--paint",
            "1,1=#f00",
            "-p",
            "2,2=#0f0",
            "--foreign-paint",
            "1,1=#00f",
            "--width",
            "8",
        ]);
        assert_eq!(cli.args.paints.len(), 2);
        assert_eq!(cli.args.foreign_paints.len(), 1);
        assert_eq!(cli.args.width, 8);
        assert_eq!(cli.args.height, 16);
        assert!(!cli.args.grid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_paints_over_neighbor() {
        let cli = TestCli::parse_from([
            "test",
            "--width",
            "4",
            "--height",
            "4",
            "--paint",
            "1,1=#f00",
            "--foreign-paint",
            "1,1=#00f",
            "--foreign-paint",
            "2,3=#0f0",
            "--grid",
        ]);

        let report = run(&cli.args, &config()).await.unwrap();

        assert_eq!(report.tally.applied, 3);
        assert_eq!(report.pixels.len(), 2);

        let mine = &report.pixels[0];
        assert_eq!(mine.coord, Coord::new(1, 1));
        assert_eq!(mine.pixel.color.as_str(), "#f00");
        assert!(!mine.provenance.is_optimistic());

        let theirs = &report.pixels[1];
        assert_eq!(theirs.coord, Coord::new(2, 3));
        assert_eq!(theirs.pixel.painter.as_str(), "0xb0b");

        assert_eq!(report.submissions.len(), 1);
        assert_eq!(report.submissions[0].status, "confirmed");

        let grid = report.grid.unwrap();
        assert_eq!(grid.len(), 4);
        assert_eq!(grid[1][1].as_str(), "#f00");
        assert_eq!(grid[0][0].as_str(), CanvasDomain::DEFAULT_BACKGROUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_rejects_out_of_bounds_paint() {
        let cli = TestCli::parse_from(["test", "--width", "4", "--height", "4", "--paint", "9,9=#f00"]);
        assert!(run(&cli.args, &config()).await.is_err());
    }
}
