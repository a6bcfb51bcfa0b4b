//! 準ニュートン法（L-BFGS + More–Thuente直線探索）とPINNモデルの橋渡し。
//!
//! `argmin` のソルバは平坦なパラメータベクトルと `(損失, 勾配)` のコールバックを前提とします。
//! [`LbfgsTrainer::fit`] は評価のたびにベクトルをモデルへ書き込み、残差から損失と勾配を計算して
//! 平坦化して返します。ソルバの状態は `fit` の呼び出し中だけ存在します。

use std::cell::RefCell;
use std::fmt;
use std::time::{Duration, Instant};

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use tracing::{debug, info, warn};

use crate::config::{LbfgsConfig, LossWeights};
use crate::error::PinnError;
use crate::flatten::ParameterLayout;
use crate::model::Approximator;
use crate::pinn::{CompositeLoss, ResidualBatches, TrainingBatches};

type FlatVector = Vec<f64>;
type Solver = LBFGS<MoreThuenteLineSearch<FlatVector, FlatVector, f64>, FlatVector, FlatVector, f64>;

/// 4つの残差項の平均二乗値。
#[derive(Clone, Debug)]
pub struct LossTerms<B: Backend> {
    pub equation: Tensor<B, 1>,
    pub initial: Tensor<B, 1>,
    pub boundary_upper: Tensor<B, 1>,
    pub boundary_lower: Tensor<B, 1>,
}

impl<B: Backend> LossTerms<B> {
    pub fn from_residuals(residuals: ResidualBatches<B>) -> Self {
        fn mean_square<B: Backend>(r: Tensor<B, 2>) -> Tensor<B, 1> {
            r.clone().mul(r).mean()
        }
        Self {
            equation: mean_square(residuals.equation),
            initial: mean_square(residuals.initial),
            boundary_upper: mean_square(residuals.boundary_upper),
            boundary_lower: mean_square(residuals.boundary_lower),
        }
    }

    /// 重み付き和。
    pub fn total(&self, weights: &LossWeights) -> Tensor<B, 1> {
        self.equation.clone().mul_scalar(weights.equation)
            + self.initial.clone().mul_scalar(weights.initial)
            + self.boundary_upper.clone().mul_scalar(weights.boundary_upper)
            + self.boundary_lower.clone().mul_scalar(weights.boundary_lower)
    }

    pub fn breakdown(&self) -> LossBreakdown {
        let scalar = |t: &Tensor<B, 1>| t.clone().into_scalar().elem::<f64>();
        LossBreakdown {
            equation: scalar(&self.equation),
            initial: scalar(&self.initial),
            boundary_upper: scalar(&self.boundary_upper),
            boundary_lower: scalar(&self.boundary_lower),
        }
    }
}

/// 各損失項のスカラー値。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LossBreakdown {
    pub equation: f64,
    pub initial: f64,
    pub boundary_upper: f64,
    pub boundary_lower: f64,
}

impl LossBreakdown {
    pub fn total(&self, weights: &LossWeights) -> f64 {
        weights.equation * self.equation
            + weights.initial * self.initial
            + weights.boundary_upper * self.boundary_upper
            + weights.boundary_lower * self.boundary_lower
    }
}

/// 学習を終えた理由。どれもエラーではありません。
#[derive(Clone, Debug, PartialEq)]
pub enum Termination {
    /// 勾配ノルムまたは損失変化が許容値を下回った
    Converged,
    MaxIterations,
    MaxEvaluations,
    Timeout,
    /// 直線探索の失敗が上限に達した
    LineSearchFailure(String),
    Other(String),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::MaxIterations => write!(f, "maximum iterations reached"),
            Self::MaxEvaluations => write!(f, "maximum evaluations reached"),
            Self::Timeout => write!(f, "time limit reached"),
            Self::LineSearchFailure(reason) => write!(f, "line search failed: {reason}"),
            Self::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// `fit` の結果と収束の診断情報。
#[derive(Clone, Debug)]
pub struct FitReport {
    pub initial_loss: f64,
    pub final_loss: f64,
    /// モデルに書き戻したパラメータでの損失内訳
    pub final_terms: LossBreakdown,
    /// 再始動をまたいだ反復回数の合計
    pub iterations: u64,
    pub evaluations: usize,
    pub line_search_failures: usize,
    pub termination: Termination,
    /// 評価ごとの総損失
    pub loss_history: Vec<f64>,
    pub elapsed: Duration,
}

/// 評価回数の上限に達したことをソルバに伝えるエラー。
#[derive(Debug)]
struct EvaluationBudgetExhausted;

impl fmt::Display for EvaluationBudgetExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluation budget exhausted")
    }
}

impl std::error::Error for EvaluationBudgetExhausted {}

/// ソルバの実行を止めた、評価器側の理由。
///
/// `argmin` の L-BFGS は直線探索中のエラーを `SolverExit` に変換して正常終了させるため、
/// エラーの型だけでは原因が分かりません。評価器が自分で記録しておきます。
#[derive(Debug)]
enum Stop {
    BudgetExhausted,
    Fatal(PinnError),
}

struct Evaluation {
    param: FlatVector,
    loss: f64,
    gradient: FlatVector,
}

/// ソルバのコールバックから呼ばれる評価器。生きたモデルを排他的に借ります。
struct Evaluator<'a, B: AutodiffBackend, M> {
    model: &'a mut M,
    loss: &'a CompositeLoss,
    batches: &'a TrainingBatches<B>,
    layout: &'a ParameterLayout,
    weights: &'a LossWeights,
    max_evaluations: usize,
    log_every: usize,
    evaluations: usize,
    cache: Option<Evaluation>,
    best: Option<(f64, FlatVector)>,
    last_valid: FlatVector,
    history: Vec<f64>,
    stop: Option<Stop>,
}

impl<B, M> Evaluator<'_, B, M>
where
    B: AutodiffBackend,
    M: Approximator<B>,
{
    fn evaluate(&mut self, param: &[f64]) -> Result<&Evaluation, argmin::core::Error> {
        let cached = self
            .cache
            .as_ref()
            .is_some_and(|c| c.param.as_slice() == param);
        if !cached {
            if let Some(Stop::Fatal(err)) = &self.stop {
                return Err(PinnError::Solver(err.to_string()).into());
            }
            if self.evaluations >= self.max_evaluations {
                self.stop.get_or_insert(Stop::BudgetExhausted);
                return Err(EvaluationBudgetExhausted.into());
            }
            match self.compute(param) {
                Ok(evaluation) => self.cache = Some(evaluation),
                Err(err) => {
                    let message = err.to_string();
                    self.stop = Some(Stop::Fatal(err));
                    return Err(PinnError::Solver(message).into());
                }
            }
        }
        self.cache
            .as_ref()
            .ok_or_else(|| PinnError::Solver("evaluation cache is empty".to_string()).into())
    }

    fn compute(&mut self, param: &[f64]) -> Result<Evaluation, PinnError> {
        self.layout.unflatten(&mut *self.model, param)?;
        self.evaluations += 1;

        let residuals = self.loss.evaluate(&*self.model, self.batches);
        let total = LossTerms::from_residuals(residuals).total(self.weights);
        let loss = total.clone().into_scalar().elem::<f64>();
        let grads = total.backward();
        let gradient = self.layout.flatten_gradients(&*self.model, &grads)?;

        let non_finite_gradients = gradient.iter().filter(|g| !g.is_finite()).count();
        if !loss.is_finite() || non_finite_gradients > 0 {
            return Err(PinnError::NumericalDivergence {
                evaluation: self.evaluations,
                loss,
                non_finite_gradients,
            });
        }

        self.history.push(loss);
        self.last_valid = param.to_vec();
        if self.best.as_ref().is_none_or(|(best, _)| loss < *best) {
            self.best = Some((loss, param.to_vec()));
        }
        if self.log_every > 0 && self.evaluations % self.log_every == 0 {
            info!(
                "[Evaluation {}] Total Loss: {:.6e}, Best: {:.6e}",
                self.evaluations,
                loss,
                self.best_loss()
            );
        } else {
            debug!(evaluation = self.evaluations, loss, "evaluated");
        }

        Ok(Evaluation {
            param: param.to_vec(),
            loss,
            gradient,
        })
    }

    fn best_loss(&self) -> f64 {
        self.best.as_ref().map_or(f64::INFINITY, |(loss, _)| *loss)
    }
}

/// `argmin` に渡す問題。評価器を共有して損失と勾配を同じ計算から返します。
struct LossProblem<'e, 'a, B: AutodiffBackend, M> {
    evaluator: &'e RefCell<Evaluator<'a, B, M>>,
}

impl<B, M> CostFunction for LossProblem<'_, '_, B, M>
where
    B: AutodiffBackend,
    M: Approximator<B>,
{
    type Param = FlatVector;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.evaluator.borrow_mut().evaluate(param)?.loss)
    }
}

impl<B, M> Gradient for LossProblem<'_, '_, B, M>
where
    B: AutodiffBackend,
    M: Approximator<B>,
{
    type Param = FlatVector;
    type Gradient = FlatVector;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        Ok(self.evaluator.borrow_mut().evaluate(param)?.gradient.clone())
    }
}

/// L-BFGSでPINNを学習させるトレーナー。
#[derive(Clone, Debug)]
pub struct LbfgsTrainer {
    config: LbfgsConfig,
    weights: LossWeights,
}

impl LbfgsTrainer {
    pub fn new(config: LbfgsConfig, weights: LossWeights) -> Result<Self, PinnError> {
        config.validate()?;
        Ok(Self { config, weights })
    }

    pub fn config(&self) -> &LbfgsConfig {
        &self.config
    }

    /// 現在のパラメータでの損失内訳を求めます。
    pub fn losses<B: Backend, M: Approximator<B>>(
        &self,
        model: &M,
        loss: &CompositeLoss,
        batches: &TrainingBatches<B>,
    ) -> LossBreakdown {
        LossTerms::from_residuals(loss.evaluate(model, batches)).breakdown()
    }

    /// モデルをその場で学習させます。
    ///
    /// 正常終了時は最良のパラメータを、数値発散時は最後に有効だったパラメータを
    /// モデルに書き戻してから返ります。
    pub fn fit<B, M>(
        &self,
        model: &mut M,
        loss: &CompositeLoss,
        batches: &TrainingBatches<B>,
    ) -> Result<FitReport, PinnError>
    where
        B: AutodiffBackend,
        M: Approximator<B>,
    {
        let start_time = Instant::now();
        let time_limit = self.config.max_seconds.map(Duration::from_secs_f64);
        let layout = ParameterLayout::from_module(&*model);
        let initial = layout.flatten(&*model)?;
        info!(
            "L-BFGSで学習を開始します - パラメータ数: {}, 履歴長: {}",
            layout.len(),
            self.config.memory
        );

        let cell = RefCell::new(Evaluator {
            model,
            loss,
            batches,
            layout: &layout,
            weights: &self.weights,
            max_evaluations: self.config.max_evaluations,
            log_every: self.config.log_every,
            evaluations: 0,
            cache: None,
            best: None,
            last_valid: initial.clone(),
            history: Vec::new(),
            stop: None,
        });

        let mut start = initial;
        let mut iterations = 0u64;
        let mut failures = 0usize;
        let termination = loop {
            let remaining_iters = self.config.max_iters.saturating_sub(iterations);
            if remaining_iters == 0 {
                break Termination::MaxIterations;
            }
            let remaining_time = match time_limit {
                Some(limit) => match limit.checked_sub(start_time.elapsed()) {
                    Some(left) if !left.is_zero() => Some(left),
                    _ => break Termination::Timeout,
                },
                None => None,
            };

            let problem = LossProblem { evaluator: &cell };
            let mut executor = Executor::new(problem, self.solver()?)
                .configure(|state| state.param(start.clone()).max_iters(remaining_iters));
            if let Some(left) = remaining_time {
                executor = executor.timeout(left);
            }

            let (run_iters, reason, run_error) = match executor.run() {
                Ok(result) => {
                    let state = result.state();
                    (state.get_iter(), state.get_termination_reason().cloned(), None)
                }
                Err(err) => (0, None, Some(err)),
            };
            iterations += run_iters;

            let stop = cell.borrow_mut().stop.take();
            match stop {
                Some(Stop::Fatal(fatal)) => {
                    let evaluator = cell.into_inner();
                    evaluator
                        .layout
                        .unflatten(evaluator.model, &evaluator.last_valid)?;
                    warn!("数値発散により学習を中断しました: {}", fatal);
                    return Err(fatal);
                }
                Some(Stop::BudgetExhausted) => break Termination::MaxEvaluations,
                None => {}
            }
            if let Some(err) = run_error {
                let evaluator = cell.into_inner();
                if let Some((_, best)) = &evaluator.best {
                    evaluator.layout.unflatten(evaluator.model, best)?;
                }
                return Err(PinnError::Solver(err.to_string()));
            }

            match reason {
                // L-BFGS は直線探索の失敗だけを `SolverExit` で報告する
                Some(TerminationReason::SolverExit(reason)) => {
                    failures += 1;
                    warn!(
                        "直線探索に失敗しました ({}/{}): {} - 最良点から再始動します",
                        failures, self.config.max_line_search_failures, reason
                    );
                    if failures > self.config.max_line_search_failures {
                        break Termination::LineSearchFailure(reason);
                    }
                    if let Some((_, best)) = &cell.borrow().best {
                        start = best.clone();
                    }
                }
                other => break classify(other.as_ref()),
            }
        };

        let evaluator = cell.into_inner();
        let (final_loss, best) = evaluator
            .best
            .ok_or_else(|| PinnError::Solver("solver finished without evaluating".to_string()))?;
        layout.unflatten(evaluator.model, &best)?;
        let final_terms = self.losses(&*evaluator.model, loss, batches);
        let report = FitReport {
            initial_loss: evaluator.history.first().copied().unwrap_or(final_loss),
            final_loss,
            final_terms,
            iterations,
            evaluations: evaluator.evaluations,
            line_search_failures: failures,
            termination,
            loss_history: evaluator.history,
            elapsed: start_time.elapsed(),
        };
        info!(
            "学習が完了しました ({}) - 反復: {}, 評価: {}, 損失: {:.6e} -> {:.6e}",
            report.termination,
            report.iterations,
            report.evaluations,
            report.initial_loss,
            report.final_loss
        );
        Ok(report)
    }

    fn solver(&self) -> Result<Solver, PinnError> {
        let line_search = MoreThuenteLineSearch::new();
        LBFGS::new(line_search, self.config.memory)
            .with_tolerance_grad(self.config.tolerance_grad)
            .and_then(|s| s.with_tolerance_cost(self.config.tolerance_cost))
            .map_err(|err| PinnError::InvalidConfig {
                reason: err.to_string(),
            })
    }
}

fn classify(reason: Option<&TerminationReason>) -> Termination {
    match reason {
        Some(TerminationReason::SolverConverged) => Termination::Converged,
        Some(TerminationReason::MaxItersReached) => Termination::MaxIterations,
        Some(TerminationReason::Timeout) => Termination::Timeout,
        Some(other) => Termination::Other(format!("{other:?}")),
        None => Termination::Other("solver stopped without a reason".to_string()),
    }
}
