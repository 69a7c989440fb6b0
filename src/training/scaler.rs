// Copyright 2022 rust-dialogsum authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use tch::Tensor;

const INIT_SCALE: f64 = 65536.0;
const GROWTH_FACTOR: f64 = 2.0;
const BACKOFF_FACTOR: f64 = 0.5;
const GROWTH_INTERVAL: usize = 2000;

/// # Dynamic loss scaling for mixed precision training
///
/// Half precision gradients underflow for small loss values. The loss is multiplied by `scale`
/// before the backward pass and the gradients divided by it before clipping and the optimizer
/// step. A step with non-finite gradients is skipped and the scale halved; the scale doubles
/// after `growth_interval` consecutive finite steps.
///
/// A disabled scaler is the identity and never skips a step.
#[derive(Debug, Clone)]
pub struct GradScaler {
    enabled: bool,
    scale: f64,
    growth_interval: usize,
    growth_tracker: usize,
}

impl GradScaler {
    pub fn new(enabled: bool) -> GradScaler {
        GradScaler {
            enabled,
            scale: INIT_SCALE,
            growth_interval: GROWTH_INTERVAL,
            growth_tracker: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current multiplier, 1 when disabled
    pub fn scale(&self) -> f64 {
        if self.enabled {
            self.scale
        } else {
            1.0
        }
    }

    /// Loss to back-propagate.
    pub fn scale_loss(&self, loss: &Tensor) -> Tensor {
        if self.enabled {
            loss * self.scale
        } else {
            loss.shallow_clone()
        }
    }

    /// Divides the gradients of `variables` by the current scale, in place.
    pub fn unscale(&self, variables: &[Tensor]) {
        if !self.enabled {
            return;
        }
        let inverse_scale = 1.0 / self.scale;
        tch::no_grad(|| {
            for variable in variables {
                let mut grad = variable.grad();
                if grad.defined() {
                    let _ = grad.g_mul_scalar_(inverse_scale);
                }
            }
        });
    }

    /// Updates the scale after a backward pass and returns whether the optimizer step
    /// should be taken.
    pub fn update(&mut self, gradients_are_finite: bool) -> bool {
        if !self.enabled {
            return true;
        }
        if !gradients_are_finite {
            self.scale *= BACKOFF_FACTOR;
            self.growth_tracker = 0;
            return false;
        }
        self.growth_tracker += 1;
        if self.growth_tracker == self.growth_interval {
            self.scale *= GROWTH_FACTOR;
            self.growth_tracker = 0;
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::Kind;

    #[test]
    fn overflow_skips_step_and_backs_off() {
        let mut scaler = GradScaler {
            growth_interval: 2,
            ..GradScaler::new(true)
        };
        assert!(!scaler.update(false));
        assert_eq!(scaler.scale(), INIT_SCALE / 2.0);

        assert!(scaler.update(true));
        assert_eq!(scaler.scale(), INIT_SCALE / 2.0);
        assert!(scaler.update(true));
        assert_eq!(scaler.scale(), INIT_SCALE);

        assert!(scaler.update(true));
        assert!(!scaler.update(false));
        assert!(scaler.update(true));
        assert_eq!(scaler.scale(), INIT_SCALE / 2.0);
    }

    #[test]
    fn disabled_scaler_is_identity() {
        let mut scaler = GradScaler::new(false);
        assert!(scaler.update(false));
        assert_eq!(scaler.scale(), 1.0);
        let loss = Tensor::from_slice(&[3f32]).sum(Kind::Float);
        assert_eq!(scaler.scale_loss(&loss).double_value(&[]), 3.0);
    }

    #[test]
    fn unscaled_gradients_match_unscaled_loss() -> anyhow::Result<()> {
        let scaler = GradScaler {
            scale: 8.0,
            ..GradScaler::new(true)
        };
        let weights = Tensor::from_slice(&[1f32, 2.0, 3.0]).set_requires_grad(true);
        let loss = (&weights * &weights).sum(Kind::Float);
        let scaled = scaler.scale_loss(&loss);
        assert_eq!(scaled.double_value(&[]), 8.0 * 14.0);

        scaled.backward();
        scaler.unscale(&[weights.shallow_clone()]);
        let grad = Vec::<f32>::try_from(&weights.grad())?;
        assert_eq!(grad, vec![2.0, 4.0, 6.0]);
        Ok(())
    }
}
