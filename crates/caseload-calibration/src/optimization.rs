//! Optimization solver setup and execution

use argmin::core::{Executor, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use argmin::solver::particleswarm::ParticleSwarm;
use caseload_core::ResponseCurve;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calibration_problem::CurveFitProblem;
use crate::error::CalibrationError;
use crate::types::CalibrationResult;

fn log_optimization_header(
    algorithm: OptimizationAlgorithm,
    parameter_names: &[String],
    initial_values: &[f64],
    max_iterations: u64,
) {
    info!(
        %algorithm,
        ?parameter_names,
        ?initial_values,
        max_iterations,
        "fitting curve"
    );
}

/// Run with the slog observer attached to every iteration
fn run_with_logging<O, S, I>(
    executor: Executor<O, S, I>,
) -> Result<argmin::core::OptimizationResult<O, S, I>, CalibrationError>
where
    O: argmin::core::CostFunction,
    S: argmin::core::Solver<O, I>,
    I: argmin::core::State,
{
    use argmin::core::observers::ObserverMode;
    use argmin_observer_slog::SlogLogger;

    executor
        .add_observer(SlogLogger::term(), ObserverMode::Always)
        .run()
        .map_err(|e| CalibrationError::Optimization(e.to_string()))
}

/// Simplex settings for the regime curve fits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NelderMeadConfig {
    pub max_iterations: u64,
    /// Stop once the simplex cost spread falls below this
    pub sd_tolerance: f64,
    /// Relative size of the initial simplex around the starting point
    pub simplex_scale: f64,
    /// Reflection, expansion, contraction and shrink coefficients; `None`
    /// keeps the solver's own
    pub alpha: Option<f64>,
    pub gamma: Option<f64>,
    pub rho: Option<f64>,
    pub sigma: Option<f64>,
    /// Attach the slog observer to every iteration
    pub verbose: bool,
}

impl Default for NelderMeadConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5000,
            sd_tolerance: 1e-10,
            simplex_scale: 0.05,
            alpha: None,
            gamma: None,
            rho: None,
            sigma: None,
            verbose: false,
        }
    }
}

impl NelderMeadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_sd_tolerance(mut self, tolerance: f64) -> Self {
        self.sd_tolerance = tolerance;
        self
    }
}

/// Swarm settings; every fitted parameter needs finite bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleSwarmConfig {
    pub num_particles: usize,
    pub max_iterations: u64,
    /// Stop as soon as the best cost reaches this
    pub target_cost: Option<f64>,
    pub inertia_factor: Option<f64>,
    pub cognitive_factor: Option<f64>,
    pub social_factor: Option<f64>,
    /// Seed for the swarm's initial positions and velocities
    pub seed: u64,
    pub verbose: bool,
}

impl Default for ParticleSwarmConfig {
    fn default() -> Self {
        Self {
            num_particles: 20,
            max_iterations: 1000,
            target_cost: None,
            inertia_factor: None,
            cognitive_factor: None,
            social_factor: None,
            seed: 0,
            verbose: false,
        }
    }
}

impl ParticleSwarmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Algorithm-specific optimization configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum OptimizationConfig {
    NelderMead(NelderMeadConfig),
    /// Seeded global search; every bound must be finite
    ParticleSwarm(ParticleSwarmConfig),
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        OptimizationConfig::NelderMead(NelderMeadConfig::default())
    }
}

impl OptimizationConfig {
    pub fn algorithm(&self) -> OptimizationAlgorithm {
        match self {
            OptimizationConfig::NelderMead(_) => OptimizationAlgorithm::NelderMead,
            OptimizationConfig::ParticleSwarm(_) => OptimizationAlgorithm::ParticleSwarm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationAlgorithm {
    NelderMead,
    ParticleSwarm,
}

impl std::fmt::Display for OptimizationAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizationAlgorithm::NelderMead => write!(f, "Nelder-Mead"),
            OptimizationAlgorithm::ParticleSwarm => write!(f, "Particle Swarm"),
        }
    }
}

/// Whether an argmin termination status counts as convergence
fn has_converged(status: &TerminationStatus) -> bool {
    matches!(
        status,
        TerminationStatus::Terminated(
            TerminationReason::SolverConverged | TerminationReason::TargetCostReached
        )
    )
}

/// Fit `problem` with the configured solver.
///
/// Parameters come back clamped to the problem's bounds. Hitting the iteration
/// limit is reported through `converged`, not as an error.
pub fn optimize<C: ResponseCurve>(
    problem: CurveFitProblem<C>,
    config: &OptimizationConfig,
) -> Result<CalibrationResult, CalibrationError> {
    let initial_params = problem.initial_parameters();
    let parameter_names = problem.parameter_names();

    match config {
        OptimizationConfig::NelderMead(nm_config) => {
            optimize_nelder_mead(problem, initial_params, parameter_names, nm_config)
        }
        OptimizationConfig::ParticleSwarm(ps_config) => {
            optimize_particle_swarm(problem, initial_params, parameter_names, ps_config)
        }
    }
}

/// Build the initial simplex: the starting point plus one vertex per parameter.
///
/// Each vertex moves one coordinate by `scale` of its value (a small absolute step
/// for values near zero), kept inside the parameter's bounds so pinned parameters
/// do not waste a vertex on a flat direction.
fn initial_simplex(initial_params: &[f64], bounds: &[(f64, f64)], scale: f64) -> Vec<Vec<f64>> {
    let mut vertices = vec![initial_params.to_vec()];
    for (i, value) in initial_params.iter().enumerate() {
        let mut step = if value.abs() < 1e-8 {
            0.00025
        } else {
            value.abs() * scale
        };
        if let Some((min, max)) = bounds.get(i) {
            let width = max - min;
            if width > 0.0 && width.is_finite() {
                step = step.min(width / 2.0);
            }
        }
        let mut vertex = initial_params.to_vec();
        vertex[i] += step;
        vertices.push(vertex);
    }
    vertices
}

fn build_nelder_mead_solver(
    initial_params: &[f64],
    bounds: &[(f64, f64)],
    config: &NelderMeadConfig,
) -> Result<NelderMead<Vec<f64>, f64>, CalibrationError> {
    let vertices = initial_simplex(initial_params, bounds, config.simplex_scale);
    let invalid = |name: &str, e: argmin::core::Error| {
        CalibrationError::InvalidProblem(format!("Failed to set {}: {}", name, e))
    };

    let mut solver = NelderMead::new(vertices)
        .with_sd_tolerance(config.sd_tolerance)
        .map_err(|e| invalid("sd_tolerance", e))?;

    if let Some(alpha) = config.alpha {
        solver = solver.with_alpha(alpha).map_err(|e| invalid("alpha", e))?;
    }

    if let Some(gamma) = config.gamma {
        solver = solver.with_gamma(gamma).map_err(|e| invalid("gamma", e))?;
    }

    if let Some(rho) = config.rho {
        solver = solver.with_rho(rho).map_err(|e| invalid("rho", e))?;
    }

    if let Some(sigma) = config.sigma {
        solver = solver.with_sigma(sigma).map_err(|e| invalid("sigma", e))?;
    }

    Ok(solver)
}

fn optimize_nelder_mead<C: ResponseCurve>(
    problem: CurveFitProblem<C>,
    initial_params: Vec<f64>,
    parameter_names: Vec<String>,
    config: &NelderMeadConfig,
) -> Result<CalibrationResult, CalibrationError> {
    let bounds = problem.parameter_bounds();
    let solver = build_nelder_mead_solver(&initial_params, &bounds, config)?;
    let max_iterations = config.max_iterations;
    let executor =
        Executor::new(problem, solver).configure(|state| state.max_iters(max_iterations));

    let result = if config.verbose {
        log_optimization_header(
            OptimizationAlgorithm::NelderMead,
            &parameter_names,
            &initial_params,
            max_iterations,
        );
        info!(sd_tolerance = config.sd_tolerance, "Nelder-Mead settings");
        run_with_logging(executor)?
    } else {
        executor
            .run()
            .map_err(|e| CalibrationError::Optimization(e.to_string()))?
    };

    let state = result.state();
    let best = state.best_param.clone().unwrap_or(initial_params);

    Ok(CalibrationResult {
        best_parameters: clamp(&best, &bounds),
        parameter_names,
        final_loss: state.best_cost,
        iterations: state.iter as usize,
        converged: has_converged(&state.termination_status),
        termination_reason: format!("{:?}", state.termination_status),
    })
}

fn optimize_particle_swarm<C: ResponseCurve>(
    problem: CurveFitProblem<C>,
    initial_params: Vec<f64>,
    parameter_names: Vec<String>,
    config: &ParticleSwarmConfig,
) -> Result<CalibrationResult, CalibrationError> {
    let bounds = problem.parameter_bounds();
    let lower_bound: Vec<f64> = bounds.iter().map(|(min, _)| *min).collect();
    let upper_bound: Vec<f64> = bounds.iter().map(|(_, max)| *max).collect();
    let invalid = |name: &str, e: argmin::core::Error| {
        CalibrationError::InvalidProblem(format!("Failed to set {}: {}", name, e))
    };

    let mut solver = ParticleSwarm::new((lower_bound, upper_bound), config.num_particles)
        .with_rng_generator(ChaCha8Rng::seed_from_u64(config.seed));

    if let Some(inertia) = config.inertia_factor {
        solver = solver
            .with_inertia_factor(inertia)
            .map_err(|e| invalid("inertia_factor", e))?;
    }

    if let Some(cognitive) = config.cognitive_factor {
        solver = solver
            .with_cognitive_factor(cognitive)
            .map_err(|e| invalid("cognitive_factor", e))?;
    }

    if let Some(social) = config.social_factor {
        solver = solver
            .with_social_factor(social)
            .map_err(|e| invalid("social_factor", e))?;
    }

    let max_iterations = config.max_iterations;
    let target_cost = config.target_cost;
    let executor = Executor::new(problem, solver).configure(|state| {
        let mut state = state.max_iters(max_iterations);
        if let Some(target) = target_cost {
            state = state.target_cost(target);
        }
        state
    });

    let result = if config.verbose {
        log_optimization_header(
            OptimizationAlgorithm::ParticleSwarm,
            &parameter_names,
            &initial_params,
            max_iterations,
        );
        info!(
            ?bounds,
            num_particles = config.num_particles,
            ?target_cost,
            "Particle Swarm settings"
        );
        run_with_logging(executor)?
    } else {
        executor
            .run()
            .map_err(|e| CalibrationError::Optimization(e.to_string()))?
    };

    let state = result.state();

    let (best_params, best_cost) = match &state.best_individual {
        Some(particle) => (particle.position.clone(), particle.cost),
        None => (initial_params, f64::INFINITY),
    };

    // A swarm has no convergence test of its own; without a target cost, running
    // to the iteration limit with a finite best is the expected way to stop.
    let converged = has_converged(&state.termination_status)
        || (target_cost.is_none()
            && best_cost.is_finite()
            && matches!(
                state.termination_status,
                TerminationStatus::Terminated(TerminationReason::MaxItersReached)
            ));

    Ok(CalibrationResult {
        best_parameters: clamp(&best_params, &bounds),
        parameter_names,
        final_loss: best_cost,
        iterations: state.iter as usize,
        converged,
        termination_reason: format!("{:?}", state.termination_status),
    })
}

fn clamp(values: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    values
        .iter()
        .zip(bounds)
        .map(|(v, (min, max))| v.clamp(*min, *max))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CalibrationParameter, CurveObservation, LossConfig};
    use approx::assert_relative_eq;
    use caseload_core::LogisticCurve;

    fn problem_for(truth: LogisticCurve, guess: [f64; 4]) -> CurveFitProblem<LogisticCurve> {
        let values: Vec<f64> = (0..40).map(|t| truth.evaluate(t as f64)).collect();
        let names = LogisticCurve::parameter_names();
        let bounds = [(-1e6, 1e6), (-1e6, 1e6), (-1e3, 1e3), (-1e4, 1e4)];
        let params = names
            .iter()
            .zip(bounds)
            .zip(guess)
            .map(|((name, (lo, hi)), g)| CalibrationParameter::with_initial_guess(name, lo, hi, g))
            .collect();
        CurveFitProblem::new(
            CurveObservation::from_daily(&values),
            params,
            LossConfig::SumSquaredError,
        )
        .unwrap()
    }

    #[test]
    fn test_initial_simplex_respects_narrow_bounds() {
        let vertices = initial_simplex(&[3.0, 0.0], &[(3.0 - 1e-6, 3.0 + 1e-6), (-1.0, 1.0)], 0.05);
        assert_eq!(vertices.len(), 3);
        assert!((vertices[1][0] - 3.0).abs() <= 1e-6);
        assert_eq!(vertices[2][1], 0.00025);
    }

    #[test]
    fn test_nelder_mead_improves_on_initial_guess() {
        let truth = LogisticCurve::new(0.0, -20.0, 0.3, 15.0);
        let guess = [1.0, -15.0, 1.0, 20.0];
        let problem = problem_for(truth, guess);
        let initial_loss = problem.calculate_loss(&LogisticCurve::from_parameters(&guess));

        let result = optimize(problem, &OptimizationConfig::default()).unwrap();
        assert_eq!(result.parameter_names.len(), 4);
        assert!(result.final_loss < initial_loss);
        assert!(result.final_loss < 1e-3);
    }

    #[test]
    fn test_result_parameters_are_clamped() {
        let truth = LogisticCurve::new(2.0, 8.0, 0.5, 10.0);
        let values: Vec<f64> = (0..30).map(|t| truth.evaluate(t as f64)).collect();
        let params = vec![
            CalibrationParameter::pinned("start", 5.0, 1e-6),
            CalibrationParameter::with_initial_guess("end", -9999.0, 9999.0, 8.0),
            CalibrationParameter::with_initial_guess("steepness", 0.1, 100.0, 1.0),
            CalibrationParameter::with_initial_guess("midpoint", 0.0, 30.0, 15.0),
        ];
        let problem = CurveFitProblem::<LogisticCurve>::new(
            CurveObservation::from_daily(&values),
            params,
            LossConfig::SumSquaredError,
        )
        .unwrap();
        let result = optimize(problem, &OptimizationConfig::default()).unwrap();
        assert_relative_eq!(result.best_parameters[0], 5.0, epsilon = 1e-6);
        assert!(result.best_parameters[2] >= 0.1);
        assert!(result.best_parameters[3] <= 30.0);
    }

    #[test]
    fn test_config_serde_tag() {
        let config: OptimizationConfig =
            serde_json::from_str(r#"{"algorithm":"nelder_mead","max_iterations":10}"#).unwrap();
        match config {
            OptimizationConfig::NelderMead(nm) => {
                assert_eq!(nm.max_iterations, 10);
                assert_eq!(nm.simplex_scale, 0.05);
            }
            _ => panic!("expected Nelder-Mead"),
        }
    }

    #[test]
    fn test_particle_swarm_is_reproducible_per_seed() {
        let truth = LogisticCurve::new(0.0, -20.0, 0.3, 15.0);
        let config = OptimizationConfig::ParticleSwarm(
            ParticleSwarmConfig::new().with_max_iterations(40).with_seed(7),
        );
        assert_eq!(config.algorithm().to_string(), "Particle Swarm");

        let first = optimize(problem_for(truth, [1.0, -15.0, 1.0, 20.0]), &config).unwrap();
        let second = optimize(problem_for(truth, [1.0, -15.0, 1.0, 20.0]), &config).unwrap();
        assert_eq!(first.best_parameters, second.best_parameters);
        assert_eq!(first.final_loss, second.final_loss);
        assert!(first.final_loss.is_finite());
    }
}
