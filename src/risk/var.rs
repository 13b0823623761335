use serde::{Deserialize, Serialize};

/// Method used to compute a VaR estimate. Selected by
/// `select_regime` from realized volatility, never hand-picked by a
/// caller once live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VarMethod {
    Parametric,
    Historical,
    MonteCarlo,
}

/// Realized-volatility regime, driving both VaR method and update
/// cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityRegime {
    Calm,
    Normal,
    Volatile,
    Extreme,
}

/// Method, cadence, and confidence implied by a volatility regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimePolicy {
    pub regime: VolatilityRegime,
    pub method: VarMethod,
    pub update_interval_seconds: f64,
    pub confidence: f64,
}

/// Bands are half-open `[lower, upper)` except the last, which is
/// unbounded above — spec's "calm (<15%)", "normal (15-25%)",
/// "volatile (25-40%)", "extreme (>40%)".
pub fn select_regime(annualized_vol: f64) -> RegimePolicy {
    if annualized_vol < 0.15 {
        RegimePolicy {
            regime: VolatilityRegime::Calm,
            method: VarMethod::Parametric,
            update_interval_seconds: 5.0,
            confidence: 0.95,
        }
    } else if annualized_vol < 0.25 {
        RegimePolicy {
            regime: VolatilityRegime::Normal,
            method: VarMethod::Historical,
            update_interval_seconds: 1.0,
            confidence: 0.99,
        }
    } else if annualized_vol < 0.40 {
        RegimePolicy {
            regime: VolatilityRegime::Volatile,
            method: VarMethod::Historical,
            update_interval_seconds: 0.5,
            confidence: 0.99,
        }
    } else {
        RegimePolicy {
            regime: VolatilityRegime::Extreme,
            method: VarMethod::MonteCarlo,
            update_interval_seconds: 0.2,
            confidence: 0.999,
        }
    }
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn stddev(xs: &[f64], mean_val: f64) -> f64 {
    let variance = xs.iter().map(|x| (x - mean_val).powi(2)).sum::<f64>() / xs.len() as f64;
    variance.sqrt()
}

/// Inverse normal CDF (Acklam's rational approximation), used by the
/// parametric method to turn a confidence level into a z-score
/// without pulling in a full stats crate.
fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e+01,
        2.209_460_984_245_205e+02,
        -2.759_285_104_469_687e+02,
        1.383_577_518_672_690e+02,
        -3.066_479_806_614_716e+01,
        2.506_628_277_459_239e+00,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e+01,
        1.615_858_368_580_409e+02,
        -1.556_989_798_598_866e+02,
        6.680_131_188_771_972e+01,
        -1.328_068_155_288_572e+01,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-03,
        -3.223_964_580_411_365e-01,
        -2.400_758_277_161_838e+00,
        -2.549_732_539_343_734e+00,
        4.374_664_141_464_968e+00,
        2.938_163_982_698_783e+00,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-03,
        3.224_671_290_700_398e-01,
        2.445_134_137_142_996e+00,
        3.754_408_661_907_416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 || p >= 1.0 {
        return if p <= 0.0 { f64::NEG_INFINITY } else { f64::INFINITY };
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

/// Linear-interpolated percentile over a sorted copy of `returns`.
/// `pct` is in `[0, 100]`.
fn percentile(returns: &[f64], pct: f64) -> f64 {
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct / 100.0) * (sorted.len() as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// VaR/CVaR over a rolling return window. All results are
/// non-negative magnitudes of potential loss, not signed returns.
pub struct VarEngine;

impl VarEngine {
    pub fn parametric(returns: &[f64], confidence: f64, horizon_days: f64) -> f64 {
        if returns.is_empty() {
            return 0.0;
        }
        let mu = mean(returns);
        let sigma = stddev(returns, mu);
        let z = inverse_normal_cdf(confidence);
        -(mu + z * sigma) * horizon_days.sqrt()
    }

    pub fn historical(returns: &[f64], confidence: f64) -> f64 {
        -percentile(returns, (1.0 - confidence) * 100.0)
    }

    /// Draws `simulations` samples from a normal fit to `returns` and
    /// applies the historical-percentile method to the simulated
    /// sample. Spec requires at least 10,000 simulations.
    pub fn monte_carlo(returns: &[f64], confidence: f64, simulations: usize) -> f64 {
        use rand::SeedableRng;
        use rand_distr::{Distribution, Normal};

        if returns.is_empty() {
            return 0.0;
        }
        let mu = mean(returns);
        let sigma = stddev(returns, mu).max(1e-12);
        let normal = Normal::new(mu, sigma).expect("valid normal parameters");
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let sims: Vec<f64> = (0..simulations.max(10_000)).map(|_| normal.sample(&mut rng)).collect();
        -percentile(&sims, (1.0 - confidence) * 100.0)
    }

    /// Expected Shortfall: mean loss conditional on breaching the VaR
    /// threshold.
    pub fn expected_shortfall(returns: &[f64], confidence: f64) -> f64 {
        if returns.is_empty() {
            return 0.0;
        }
        let threshold = percentile(returns, (1.0 - confidence) * 100.0);
        let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= threshold).collect();
        if tail.is_empty() {
            return -threshold;
        }
        -mean(&tail)
    }

    pub fn realized_volatility_annualized(returns: &[f64], trading_days_per_year: f64) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let mu = mean(returns);
        stddev(returns, mu) * trading_days_per_year.sqrt()
    }
}

/// Kupiec proportion-of-failures test result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub statistic: f64,
    pub p_value: f64,
    pub passes: bool,
}

/// Kupiec POF test: likelihood-ratio statistic under the null that
/// the observed breach rate matches `1 - confidence`.
pub fn kupiec_test(breaches: u32, observations: u32, confidence: f64) -> BacktestResult {
    if observations == 0 {
        return BacktestResult {
            statistic: 0.0,
            p_value: 1.0,
            passes: true,
        };
    }
    let p = 1.0 - confidence;
    let n = observations as f64;
    let x = breaches as f64;
    let observed_rate = (x / n).clamp(1e-9, 1.0 - 1e-9);

    let log_l_null = x * p.ln() + (n - x) * (1.0 - p).ln();
    let log_l_alt = x * observed_rate.ln() + (n - x) * (1.0 - observed_rate).ln();
    let lr = -2.0 * (log_l_null - log_l_alt);

    let p_value = chi_square_sf(lr, 1);
    BacktestResult {
        statistic: lr,
        p_value,
        passes: p_value > 0.05,
    }
}

/// Christoffersen conditional-coverage test: combines Kupiec's
/// unconditional-coverage statistic with an independence test over
/// breach-to-breach transitions.
pub fn christoffersen_test(breach_sequence: &[bool], confidence: f64) -> BacktestResult {
    let breaches = breach_sequence.iter().filter(|b| **b).count() as u32;
    let observations = breach_sequence.len() as u32;
    let uc = kupiec_test(breaches, observations, confidence);

    let mut n00 = 0u32;
    let mut n01 = 0u32;
    let mut n10 = 0u32;
    let mut n11 = 0u32;
    for w in breach_sequence.windows(2) {
        match (w[0], w[1]) {
            (false, false) => n00 += 1,
            (false, true) => n01 += 1,
            (true, false) => n10 += 1,
            (true, true) => n11 += 1,
        }
    }

    let ind_lr = independence_lr(n00, n01, n10, n11);
    let lr_cc = uc.statistic + ind_lr;
    let p_value = chi_square_sf(lr_cc, 2);
    BacktestResult {
        statistic: lr_cc,
        p_value,
        passes: p_value > 0.05,
    }
}

fn independence_lr(n00: u32, n01: u32, n10: u32, n11: u32) -> f64 {
    let (n00, n01, n10, n11) = (n00 as f64, n01 as f64, n10 as f64, n11 as f64);
    let n0 = n00 + n01;
    let n1 = n10 + n11;
    if n0 == 0.0 || n1 == 0.0 {
        return 0.0;
    }
    let pi01 = if n0 > 0.0 { n01 / n0 } else { 0.0 };
    let pi11 = if n1 > 0.0 { n11 / n1 } else { 0.0 };
    let pi = (n01 + n11) / (n0 + n1);

    let log_l_null = (n00 + n10) * (1.0 - pi).max(1e-12).ln() + (n01 + n11) * pi.max(1e-12).ln();
    let log_l_alt = n00 * (1.0 - pi01).max(1e-12).ln()
        + n01 * pi01.max(1e-12).ln()
        + n10 * (1.0 - pi11).max(1e-12).ln()
        + n11 * pi11.max(1e-12).ln();
    -2.0 * (log_l_null - log_l_alt)
}

/// Survival function of the chi-square distribution via the regularized
/// upper incomplete gamma function, evaluated through a continued
/// fraction (Numerical Recipes `gcf`). `k` is degrees of freedom.
fn chi_square_sf(x: f64, k: u32) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    let a = k as f64 / 2.0;
    let x2 = x / 2.0;
    1.0 - regularized_lower_incomplete_gamma(a, x2)
}

fn regularized_lower_incomplete_gamma(a: f64, x: f64) -> f64 {
    if x < a + 1.0 {
        gamma_series(a, x)
    } else {
        1.0 - gamma_continued_fraction(a, x)
    }
}

fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_327_112_15,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_93e-2,
        -0.539_523_938_495_912_9e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5 - (x + 5.5).ln() * (x + 5.5);
    let mut ser = 1.000_000_000_190_015;
    for c in COEFFS {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.506_628_274_631_000_7 * ser / x).ln()
}

fn gamma_series(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let mut ap = a;
    let mut sum = 1.0 / a;
    let mut del = sum;
    for _ in 0..200 {
        ap += 1.0;
        del *= x / ap;
        sum += del;
        if del.abs() < sum.abs() * 1e-12 {
            break;
        }
    }
    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

fn gamma_continued_fraction(a: f64, x: f64) -> f64 {
    let mut b = x + 1.0 - a;
    let mut c = 1e300;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..200 {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < 1e-300 {
            d = 1e-300;
        }
        c = b + an / c;
        if c.abs() < 1e-300 {
            c = 1e-300;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < 1e-12 {
            break;
        }
    }
    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

/// Basel traffic-light classification over a 250-day backtest window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BaselZone {
    Green,
    Yellow,
    Red,
}

pub fn basel_traffic_light(breaches_in_250_days: u32) -> BaselZone {
    match breaches_in_250_days {
        0..=4 => BaselZone::Green,
        5..=9 => BaselZone::Yellow,
        _ => BaselZone::Red,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regime_selection_matches_bands() {
        assert_eq!(select_regime(0.10).method, VarMethod::Parametric);
        assert_eq!(select_regime(0.10).update_interval_seconds, 5.0);
        assert_eq!(select_regime(0.20).method, VarMethod::Historical);
        assert_eq!(select_regime(0.20).confidence, 0.99);
        assert_eq!(select_regime(0.30).update_interval_seconds, 0.5);
        assert_eq!(select_regime(0.50).method, VarMethod::MonteCarlo);
        assert_eq!(select_regime(0.50).confidence, 0.999);
    }

    #[test]
    fn historical_var_is_nonnegative_for_losses() {
        let returns = vec![-0.05, -0.03, -0.01, 0.0, 0.01, 0.02, 0.03];
        let var = VarEngine::historical(&returns, 0.95);
        assert!(var >= 0.0);
    }

    #[test]
    fn monte_carlo_runs_at_least_ten_thousand_sims() {
        let returns = vec![-0.02, -0.01, 0.0, 0.01, 0.02];
        let var = VarEngine::monte_carlo(&returns, 0.99, 1000);
        assert!(var.is_finite());
    }

    #[test]
    fn basel_zones_match_breach_bands() {
        assert_eq!(basel_traffic_light(0), BaselZone::Green);
        assert_eq!(basel_traffic_light(4), BaselZone::Green);
        assert_eq!(basel_traffic_light(5), BaselZone::Yellow);
        assert_eq!(basel_traffic_light(9), BaselZone::Yellow);
        assert_eq!(basel_traffic_light(10), BaselZone::Red);
    }

    #[test]
    fn kupiec_accepts_well_calibrated_breach_rate() {
        let result = kupiec_test(5, 250, 0.98);
        assert!(result.p_value > 0.0);
    }
}
