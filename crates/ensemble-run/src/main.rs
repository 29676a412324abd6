/// Batch runner for the ensemble statistics products.
/// Reads a run configuration and a serialised field (JSON), writes one JSON
/// document per product.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ensemble_core::{
    forecast_period_labels, generate_tercile_probability, gulf_stream_index_within, regional_terciles,
    AnomalyEngine, BaselineSource, Climatology, ClimatologyBaseline, FocusBox, ForecastClimatology,
    ForecastPeriods, GriddedField, HistoricalClimatology, LeadBins, MarineHeatwaveForecast, QuantileEngine,
    ReferencePeriod, RegionMask, SampleDim, StatsConfig, TercileEngine, TercileProbability,
};

#[derive(Parser, Debug)]
#[command(name = "ensemble-run", about = "Compute ensemble statistics products from a JSON field")]
struct Args {
    /// Path to the run configuration JSON.
    #[arg(short, long)]
    config: PathBuf,

    /// Path to a serialised GriddedField JSON file.
    #[arg(short, long)]
    input: PathBuf,

    /// Single-init forecast field, required for tercile probabilities.
    #[arg(short, long)]
    forecast: Option<PathBuf>,

    /// Directory the products are written to.
    #[arg(short, long, default_value = "products")]
    output: PathBuf,

    /// Debug-level logging unless RUST_LOG is set.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Product {
    Climatology,
    Anomaly,
    Threshold,
    Tercile,
    TercileProbability,
    Heatwave,
    RegionalTercile,
    GulfStreamIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegionSpec {
    name: String,
    mask: Vec<f64>,
    area: Vec<f64>,
}

/// What to compute and over which years. Missing periods default to the
/// full year extent of the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RunConfig {
    products: Vec<Product>,
    climatology_period: Option<ReferencePeriod>,
    anomaly_period: Option<ReferencePeriod>,
    /// Precomputed climatology used for anomalies instead of building one.
    baseline: Option<PathBuf>,
    percentile: f64,
    lead_bins: Option<LeadBins>,
    detrend: bool,
    regions: Vec<RegionSpec>,
    /// Search region of the Gulf Stream index.
    focus_box: FocusBox,
    stats: StatsConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            products: vec![Product::Climatology, Product::Anomaly],
            climatology_period: None,
            anomaly_period: None,
            baseline: None,
            percentile: 90.0,
            lead_bins: None,
            detrend: false,
            regions: Vec::new(),
            focus_box: FocusBox::default(),
            stats: StatsConfig::default(),
        }
    }
}

impl RunConfig {
    fn from_json_str(s: &str) -> Result<Self> {
        let cfg: RunConfig = serde_json::from_str(s).context("parsing run configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.products.is_empty() {
            bail!("run configuration selects no products");
        }
        if !(0.0..=100.0).contains(&self.percentile) {
            bail!("percentile {} is outside [0, 100]", self.percentile);
        }
        if self.products.contains(&Product::RegionalTercile) && self.regions.is_empty() {
            bail!("regional_tercile needs at least one region");
        }
        self.stats.validate()?;
        Ok(())
    }
}

/// Tercile probability with display labels for the lead bins.
#[derive(Debug, Serialize)]
struct ProbabilityProduct {
    probability: TercileProbability,
    periods: Option<ForecastPeriods>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let text = fs::read_to_string(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let cfg = RunConfig::from_json_str(&text)?;
    let field: GriddedField = read_json(&args.input)?;
    let forecast: Option<GriddedField> = args.forecast.as_deref().map(read_json).transpose()?;

    let written = run(&cfg, field, forecast, &args.output)?;
    info!(products = written.len(), output = %args.output.display(), "done");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "ensemble_run=debug,ensemble_core=debug"
    } else {
        "ensemble_run=info,ensemble_core=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file)).with_context(|| format!("decoding {}", path.display()))
}

fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(name);
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "product written");
    Ok(path)
}

fn event_file_name(var_name: &str, init: NaiveDate) -> String {
    format!("heatwave.{var_name}.i{}.json", init.format("%Y%m"))
}

/// Run every selected product; returns the paths written.
fn run(cfg: &RunConfig, field: GriddedField, forecast: Option<GriddedField>, out: &Path) -> Result<Vec<PathBuf>> {
    let (first, last) = field.year_extent()?;
    let climo_period = cfg.climatology_period.unwrap_or(ReferencePeriod { start_year: first, end_year: last });
    let anom_period = cfg.anomaly_period.unwrap_or(climo_period);
    debug!(variable = %field.name, %climo_period, %anom_period, products = ?cfg.products, "run");

    let is_forecast = field.samples.dim == SampleDim::Init;
    let needs_forecast = |product: Product| -> Result<()> {
        if !is_forecast {
            bail!("{product:?} needs an initialized forecast field, input is sampled along time");
        }
        Ok(())
    };

    let climo: Box<dyn Climatology> = if is_forecast {
        Box::new(ForecastClimatology::new(field.clone(), &cfg.stats)?)
    } else {
        Box::new(HistoricalClimatology::new(field.clone(), &cfg.stats)?)
    };
    let baseline: Option<ClimatologyBaseline> = cfg.baseline.as_deref().map(read_json).transpose()?;
    let mode = cfg.stats.evaluation;

    let mut written = Vec::new();
    for &product in &cfg.products {
        match product {
            Product::Climatology => {
                let b = climo
                    .generate_climo(climo_period.start_year, climo_period.end_year, mode)?
                    .materialize();
                written.push(write_json(out, "climatology.json", &b)?);
            }
            Product::Anomaly | Product::Threshold => {
                let source = match &baseline {
                    Some(b) => BaselineSource::FromBaseline(b),
                    None => BaselineSource::FromScratch,
                };
                let anom = AnomalyEngine::new(climo.as_ref())
                    .generate_anom_batch(
                        climo_period.start_year,
                        climo_period.end_year,
                        anom_period.start_year,
                        anom_period.end_year,
                        mode,
                        source,
                    )?
                    .materialize();
                if product == Product::Anomaly {
                    written.push(write_json(out, "anomaly.json", &anom.anomaly)?);
                } else {
                    let threshold = QuantileEngine::new(anom.anomaly.field)?
                        .generate_quantile(anom_period.start_year, anom_period.end_year, cfg.percentile, true)?
                        .materialize();
                    let name = format!("{}.json", threshold.var_name());
                    written.push(write_json(out, &name, &threshold)?);
                }
            }
            Product::Tercile => {
                needs_forecast(product)?;
                let t = TercileEngine::new(field.clone(), &cfg.stats)?
                    .generate_tercile(climo_period.start_year, climo_period.end_year)?;
                written.push(write_json(out, "tercile.json", &t)?);
            }
            Product::TercileProbability => {
                needs_forecast(product)?;
                let Some(fc) = forecast.as_ref() else {
                    bail!("tercile_probability needs --forecast");
                };
                let t = TercileEngine::new(field.clone(), &cfg.stats)?
                    .generate_tercile(climo_period.start_year, climo_period.end_year)?;
                let probability = generate_tercile_probability(fc, &field.name, &t, cfg.lead_bins.as_ref(), &cfg.stats)?;
                let periods = cfg
                    .lead_bins
                    .as_ref()
                    .map(|bins| forecast_period_labels(probability.init, bins))
                    .transpose()?;
                written.push(write_json(out, "tercile_probability.json", &ProbabilityProduct { probability, periods })?);
            }
            Product::Heatwave => {
                needs_forecast(product)?;
                let batch = MarineHeatwaveForecast::new(field.clone(), &cfg.stats)?.generate_forecast_batch(
                    climo_period.start_year,
                    climo_period.end_year,
                    anom_period.start_year,
                    anom_period.end_year,
                    cfg.percentile,
                    cfg.detrend,
                )?;
                let var_name = batch.threshold.var_name();
                written.push(write_json(out, &format!("{var_name}.json"), &batch.threshold)?);
                if let Some(trend) = &batch.trend {
                    written.push(write_json(out, "trend.json", trend)?);
                }
                for event in &batch.events {
                    written.push(write_json(out, &event_file_name(&var_name, event.init), event)?);
                }
            }
            Product::GulfStreamIndex => {
                if is_forecast {
                    bail!("{product:?} needs a historical field sampled along time");
                }
                let gsi = gulf_stream_index_within(field.clone(), &cfg.focus_box, &cfg.stats)?;
                written.push(write_json(out, "gulf_stream_index.json", &gsi)?);
            }
            Product::RegionalTercile => {
                needs_forecast(product)?;
                let regions = cfg
                    .regions
                    .iter()
                    .map(|r| RegionMask::new(&r.name, &r.mask, &r.area))
                    .collect::<ensemble_core::Result<Vec<_>>>()?;
                let t = regional_terciles(&field, &regions, climo_period.start_year, climo_period.end_year, &cfg.stats)?;
                written.push(write_json(out, "regional_tercile.json", &t)?);
            }
        }
    }
    Ok(written)
}
