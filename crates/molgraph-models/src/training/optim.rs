use candle_core::backprop::GradStore;
use candle_core::{Result, Var};
use candle_nn::Optimizer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamsAdam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    /// L2 penalty added to the gradient before the moment updates.
    pub weight_decay: f64,
}

impl Default for ParamsAdam {
    fn default() -> Self {
        Self {
            lr: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

#[derive(Debug)]
struct VarAdam {
    var: Var,
    first_moment: Var,
    second_moment: Var,
}

/// Adam with coupled (L2) weight decay. Variables that receive no gradient
/// in a step, such as batch-norm running statistics, are left untouched.
#[derive(Debug)]
pub struct Adam {
    vars: Vec<VarAdam>,
    step_t: usize,
    params: ParamsAdam,
}

impl Optimizer for Adam {
    type Config = ParamsAdam;

    fn new(vars: Vec<Var>, params: ParamsAdam) -> Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let first_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                let second_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(VarAdam {
                    var,
                    first_moment,
                    second_moment,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            vars,
            step_t: 0,
            params,
        })
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step_t += 1;
        let ParamsAdam {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.params;
        let scale_m = 1.0 / (1.0 - beta1.powi(self.step_t as i32));
        let scale_v = 1.0 / (1.0 - beta2.powi(self.step_t as i32));
        for var in self.vars.iter() {
            let theta = &var.var;
            let Some(g) = grads.get(theta) else {
                continue;
            };
            let g = if weight_decay > 0.0 {
                (g + (theta.as_tensor() * weight_decay)?)?
            } else {
                g.clone()
            };
            let m = &var.first_moment;
            let v = &var.second_moment;
            let next_m = ((m.as_tensor() * beta1)? + (&g * (1.0 - beta1))?)?;
            let next_v = ((v.as_tensor() * beta2)? + (g.sqr()? * (1.0 - beta2))?)?;
            let m_hat = (&next_m * scale_m)?;
            let v_hat = (&next_v * scale_v)?;
            let update = (m_hat / (v_hat.sqrt()? + eps)?)?;
            theta.set(&theta.sub(&(update * lr)?)?)?;
            m.set(&next_m)?;
            v.set(&next_v)?;
        }
        Ok(())
    }
}

/// Rescale the gradients of `vars` so their global L2 norm is at most
/// `max_norm`. Returns the norm before clipping.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let mut total = 0f64;
    for var in vars {
        if let Some(g) = grads.get(var.as_tensor()) {
            total += g.sqr()?.sum_all()?.to_dtype(candle_core::DType::F64)?.to_scalar::<f64>()?;
        }
    }
    let total = total.sqrt();
    if total > max_norm {
        let scale = max_norm / (total + 1e-6);
        for var in vars {
            if let Some(g) = grads.get(var.as_tensor()) {
                let clipped = (g * scale)?;
                grads.insert(var.as_tensor(), clipped);
            }
        }
    }
    Ok(total)
}
