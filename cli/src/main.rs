use std::{
    error::Error,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Instant,
};

use clap::{Parser, Subcommand, builder::PossibleValuesParser};
use colored::Colorize;
use diffeq::{OdeProblem, SaveMethod, StepperMethods};
use legendre::Legendre;
use log::info;
use utilities::{format_duration, format_number};

mod config;
mod models;

use config::SimulationConfig;
use models::Models;

#[derive(Debug, Parser)]
#[command(version, about = "Fixed step ODE integration demos", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Integrate a demo model and write the trajectory to csv
    Run {
        #[arg(value_enum)]
        model: Models,
        #[arg(value_parser = PossibleValuesParser::new(StepperMethods::NAMES))]
        stepper: String,
        /// Stage count for the implicit Runge-Kutta steppers
        #[arg(long, default_value_t = 2)]
        stages: usize,
        /// Scales the number of steps (default 100)
        #[arg(long, default_value_t = 1.0)]
        n_factor: f64,
        /// Scales the end time (default 4 pi)
        #[arg(long, default_value_t = 1.0)]
        t_end_factor: f64,
        /// ron file with a SimulationConfig
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
    /// Tabulate Legendre polynomials and their derivatives on [-1, 1]
    Legendre {
        #[arg(long, default_value_t = 5)]
        degree: usize,
        #[arg(long, default_value_t = 101)]
        points: usize,
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            model,
            stepper,
            stages,
            n_factor,
            t_end_factor,
            config,
            output,
        } => run(
            model,
            &stepper,
            stages,
            n_factor,
            t_end_factor,
            config.as_deref(),
            &output,
        ),
        Commands::Legendre {
            degree,
            points,
            output,
        } => tabulate_legendre(degree, points, &output).map(|path| {
            info!("wrote {}", path.display());
        }),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            ExitCode::FAILURE
        }
    }
}

fn run(
    model: Models,
    stepper: &str,
    stages: usize,
    n_factor: f64,
    t_end_factor: f64,
    config: Option<&Path>,
    output: &Path,
) -> Result<(), Box<dyn Error>> {
    let base = match config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };
    let settings = base.scaled(n_factor, t_end_factor)?;
    let method = StepperMethods::from_name(stepper, stages)?;
    let path = output.join(output_file_name(model, method, n_factor, t_end_factor));

    let (rhs, y0) = model.build();
    let problem = OdeProblem::new(rhs, method)?
        .with_newton_settings(settings.newton)
        .with_progress_bar();

    info!(
        "running {} with tau = {}, writing {}",
        model.name(),
        format_number(settings.t_end / settings.steps as f64),
        path.display()
    );
    let start = Instant::now();
    let solution = problem.solve_fixed(&y0, settings.t_end, settings.steps, &SaveMethod::File(path))?;
    info!(
        "finished in {}, y(t_end) = [{}]",
        format_duration(start.elapsed()),
        solution
            .y
            .iter()
            .map(|v| format_number(*v))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}

/// `<model>_<stepper>_nomod.csv` at the default factors, otherwise the
/// modified factors are appended as `_<f>tend` and `_<f>steps`.
fn output_file_name(model: Models, method: StepperMethods, n_factor: f64, t_end_factor: f64) -> String {
    const EPS: f64 = 1e-12;
    let mut name = format!("{}_{method}", model.name());
    let t_modified = (t_end_factor - 1.0).abs() > EPS;
    let n_modified = (n_factor - 1.0).abs() > EPS;
    if !t_modified && !n_modified {
        name.push_str("_nomod");
    }
    if t_modified {
        name.push_str(&format!("_{t_end_factor}tend"));
    }
    if n_modified {
        name.push_str(&format!("_{n_factor}steps"));
    }
    name.push_str(".csv");
    name
}

/// Writes `x, P0..Pn, dP0..dPn` rows to `legendre.csv`.
fn tabulate_legendre(degree: usize, points: usize, output: &Path) -> Result<PathBuf, Box<dyn Error>> {
    if points < 2 {
        return Err("need at least two points".into());
    }
    std::fs::create_dir_all(output)?;
    let path = output.join("legendre.csv");
    let mut writer = csv::Writer::from_path(&path)?;

    let mut headers = vec!["x".to_string()];
    headers.extend((0..=degree).map(|l| format!("P{l}")));
    headers.extend((0..=degree).map(|l| format!("dP{l}")));
    writer.write_record(&headers)?;

    let mut legendre = Legendre::new(degree);
    for i in 0..points {
        // clamp so the last point is exactly 1
        let x = (-1.0 + 2.0 * i as f64 / (points - 1) as f64).min(1.0);
        legendre.calculate(x)?;
        let mut record = vec![x.to_string()];
        record.extend(legendre.p.iter().map(|v| v.to_string()));
        record.extend(legendre.dp.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_output_file_name() {
        let method = StepperMethods::from_name("crank_nicolson", 2).unwrap();
        assert_eq!(
            output_file_name(Models::MassSpring, method, 1.0, 1.0),
            "mass_spring_crank_nicolson_nomod.csv"
        );
        let method = StepperMethods::from_name("impl_rk_gauss_radau", 3).unwrap();
        assert_eq!(
            output_file_name(Models::Pendulum, method, 2.0, 0.5),
            "pendulum_impl_rk_gauss_radau_3_0.5tend_2steps.csv"
        );
    }

    #[test]
    fn test_run_writes_trajectory() {
        let dir = tempdir().unwrap();
        run(Models::MassSpring, "impl_euler", 2, 0.5, 1.0, None, dir.path()).unwrap();
        let path = dir.path().join("mass_spring_impl_euler_0.5steps.csv");
        let mut reader = csv::Reader::from_path(path).unwrap();
        assert_eq!(reader.records().count(), 51);
    }

    #[test]
    fn test_run_rejects_bad_factors() {
        let dir = tempdir().unwrap();
        assert!(run(Models::Pendulum, "exp_euler", 2, -1.0, 1.0, None, dir.path()).is_err());
        assert!(run(Models::Pendulum, "rk45", 2, 1.0, 1.0, None, dir.path()).is_err());
    }

    #[test]
    fn test_legendre_table() {
        let dir = tempdir().unwrap();
        let path = tabulate_legendre(3, 5, dir.path()).unwrap();
        let mut reader = csv::Reader::from_path(path).unwrap();
        assert_eq!(reader.headers().unwrap().len(), 9);
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 5);
        // P3(1) = 1 and P3'(1) = 6
        assert_eq!(&rows[4][4], "1");
        assert_eq!(&rows[4][8], "6");
    }
}
