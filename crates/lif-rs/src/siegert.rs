//! Stationary rates of LIF neurons driven by Gaussian noise.
//!
//! The white-noise Siegert formula
//!
//! ```text
//! 1/nu = tau_r + tau_m * sqrt(pi) * Int_{y_r}^{y_th} exp(u^2) (1 + erf(u)) du
//! y = (V - mu) / sigma
//! ```
//!
//! is evaluated with `exp(u^2)(1 + erf(u)) = erfcx(-u)`, which keeps the
//! integrand finite for inhibition-dominated inputs. Synaptic filtering is
//! included by shifting threshold and reset by `sigma * alpha/2 * sqrt(tau_s/tau_m)`.

use crate::NeuronParams;
use meanfield_core::KernelError;

/// sqrt(2) * |zeta(1/2)|
pub const SHIFT_ALPHA: f64 = std::f64::consts::SQRT_2 * 1.460_354_508_809_586_8;

const SIMPSON_PANELS: usize = 2000;

/// Scaled complementary error function `exp(x^2) erfc(x)`
///
/// Chebyshev fit with fractional error below 1.2e-7 for `x >= 0`; negative
/// arguments use the reflection `erfcx(-x) = 2 exp(x^2) - erfcx(x)`.
pub fn erfcx(x: f64) -> f64 {
    if x < 0.0 {
        return 2.0 * (x * x).exp() - erfcx(-x);
    }
    let t = 1.0 / (1.0 + 0.5 * x);
    let poly = -1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    t * poly.exp()
}

pub fn erf(x: f64) -> f64 {
    let a = x.abs();
    let erfc = erfcx(a) * (-a * a).exp();
    (1.0 - erfc).copysign(x)
}

/// Composite Simpson rule on `[a, b]` with an even number of panels
pub fn simpson<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, panels: usize) -> f64 {
    let n = if panels % 2 == 0 { panels } else { panels + 1 };
    let h = (b - a) / n as f64;
    let mut sum = f(a) + f(b);
    for i in 1..n {
        let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * f(a + i as f64 * h);
    }
    sum * h / 3.0
}

/// White-noise Siegert rate in Hz (all inputs SI)
pub fn siegert(
    v_0: f64,
    v_th: f64,
    mu: f64,
    sigma: f64,
    tau_m: f64,
    tau_r: f64,
) -> Result<f64, KernelError> {
    if !(sigma > 0.0) {
        return Err(KernelError::InvalidInput(format!(
            "input standard deviation must be positive, got {}",
            sigma
        )));
    }
    if v_th <= v_0 {
        return Err(KernelError::InvalidInput(format!(
            "threshold {} must lie above reset {}",
            v_th, v_0
        )));
    }
    let y_th = (v_th - mu) / sigma;
    let y_r = (v_0 - mu) / sigma;
    let integral = simpson(|u| erfcx(-u), y_r, y_th, SIMPSON_PANELS);
    let isi = tau_r + tau_m * std::f64::consts::PI.sqrt() * integral;
    if isi.is_infinite() {
        return Ok(0.0);
    }
    Ok(1.0 / isi)
}

/// Siegert rate with the colored-noise boundary shift
pub fn firing_rate_shift(neuron: &NeuronParams, mu: f64, sigma: f64) -> Result<f64, KernelError> {
    let shift = sigma * SHIFT_ALPHA / 2.0 * (neuron.tau_s / neuron.tau_m).sqrt();
    siegert(
        neuron.v_0_rel + shift,
        neuron.v_th_rel + shift,
        mu,
        sigma,
        neuron.tau_m,
        neuron.tau_r,
    )
}

/// Slope of the shifted rate with respect to the mean input, in Hz/V
pub fn rate_slope(neuron: &NeuronParams, mu: f64, sigma: f64) -> Result<f64, KernelError> {
    let h = 1e-6 * sigma.max(1e-6);
    let up = firing_rate_shift(neuron, mu + h, sigma)?;
    let down = firing_rate_shift(neuron, mu - h, sigma)?;
    Ok((up - down) / (2.0 * h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erf_reference_values() {
        assert!((erf(0.0)).abs() < 1e-7);
        assert!((erf(0.5) - 0.520_499_877_8).abs() < 1e-6);
        assert!((erf(-1.0) + 0.842_700_792_9).abs() < 1e-6);
        assert!((erf(3.0) - 0.999_977_909_5).abs() < 1e-6);
    }

    #[test]
    fn test_erfcx_reflection() {
        // erfcx(0) = 1
        assert!((erfcx(0.0) - 1.0).abs() < 1e-6);
        // exp(1) * erfc(-1) = e * (1 + erf(1))
        let expected = 1.0f64.exp() * (1.0 + 0.842_700_792_9);
        assert!((erfcx(-1.0) - expected).abs() / expected < 1e-6);
    }

    #[test]
    fn test_simpson_polynomial() {
        let integral = simpson(|x| x * x, 0.0, 3.0, 10);
        assert!((integral - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_siegert_monotone_in_mean() {
        let neuron = NeuronParams::default();
        let low = siegert(neuron.v_0_rel, neuron.v_th_rel, 0.005, 0.005, neuron.tau_m, neuron.tau_r).unwrap();
        let high = siegert(neuron.v_0_rel, neuron.v_th_rel, 0.012, 0.005, neuron.tau_m, neuron.tau_r).unwrap();
        assert!(low > 0.0);
        assert!(high > low);
        // refractoriness bounds the rate
        assert!(high < 1.0 / neuron.tau_r);
    }

    #[test]
    fn test_siegert_rejects_zero_sigma() {
        let neuron = NeuronParams::default();
        let result = siegert(neuron.v_0_rel, neuron.v_th_rel, 0.01, 0.0, neuron.tau_m, neuron.tau_r);
        assert!(matches!(result, Err(KernelError::InvalidInput(_))));
    }

    #[test]
    fn test_shift_lowers_rate() {
        let neuron = NeuronParams::default();
        let white = siegert(neuron.v_0_rel, neuron.v_th_rel, 0.01, 0.004, neuron.tau_m, neuron.tau_r).unwrap();
        let colored = firing_rate_shift(&neuron, 0.01, 0.004).unwrap();
        assert!(colored < white);
        assert!(rate_slope(&neuron, 0.01, 0.004).unwrap() > 0.0);
    }
}
