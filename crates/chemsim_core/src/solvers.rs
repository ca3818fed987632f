use crate::traits::{Steppable, VectorField};

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    tmp: Vec<f64>,
}

impl RK4 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

impl Steppable for RK4 {
    fn step(&mut self, field: &impl VectorField, t: &mut f64, state: &mut [f64], dt: f64) {
        let t0 = *t;
        let half = 0.5 * dt;

        // k1 = f(t, y)
        field.apply(t0, state, &mut self.k1);

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + half * self.k1[i];
        }
        field.apply(t0 + half, &self.tmp, &mut self.k2);

        // k3 = f(t + dt/2, y + dt*k2/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + half * self.k2[i];
        }
        field.apply(t0 + half, &self.tmp, &mut self.k3);

        // k4 = f(t + dt, y + dt*k3)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        field.apply(t0 + dt, &self.tmp, &mut self.k4);

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        for i in 0..state.len() {
            state[i] += dt / 6.0 * (self.k1[i] + 2.0 * self.k2[i] + 2.0 * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
    }
}

// Tsit5 tableau
const C2: f64 = 0.161;
const C3: f64 = 0.327;
const C4: f64 = 0.9;
const C5: f64 = 0.9800255409045097;

const A21: f64 = 0.161;
const A31: f64 = -0.008480655492356989;
const A32: f64 = 0.335480655492357;
const A41: f64 = 2.897153057105493;
const A42: f64 = -6.359448489975075;
const A43: f64 = 4.3622954328695815;
const A51: f64 = 5.325864828439257;
const A52: f64 = -11.748883564062828;
const A53: f64 = 7.4955393428898365;
const A54: f64 = -0.09249506636175525;
const A61: f64 = 5.86145544294642;
const A62: f64 = -12.92096931784711;
const A63: f64 = 8.159367898576159;
const A64: f64 = -0.071584973281401;
const A65: f64 = -0.028269050394068383;

// 5th order weights (equal to the last row of A, the method is FSAL)
const B1: f64 = 0.09646076681806523;
const B2: f64 = 0.01;
const B3: f64 = 0.4798896504144996;
const B4: f64 = 1.379008574103742;
const B5: f64 = -3.290069515436081;
const B6: f64 = 2.324710524099774;

// Difference between the 5th and embedded 4th order weights
const E1: f64 = -0.00178001105222577714;
const E2: f64 = -0.0008164344596567469;
const E3: f64 = 0.007880878010261995;
const E4: f64 = -0.1447110071732629;
const E5: f64 = 0.5823571654525552;
const E6: f64 = -0.45808210592918697;
const E7: f64 = 0.015151515151515152;

/// Tsitouras 5/4 Solver
///
/// Driven through [`Tsit5::trial_step`] by the adaptive integrator, which
/// accepts or rejects each step from the embedded error estimate.
pub struct Tsit5 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    k7: Vec<f64>,
    tmp: Vec<f64>,
}

impl Tsit5 {
    /// Order of the embedded error estimate.
    pub const ERROR_ORDER: usize = 4;

    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            k7: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }

    fn compute_stages(&mut self, field: &impl VectorField, t0: f64, state: &[f64], dt: f64) {
        field.apply(t0, state, &mut self.k1);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * (A21 * self.k1[i]);
        }
        field.apply(t0 + C2 * dt, &self.tmp, &mut self.k2);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * (A31 * self.k1[i] + A32 * self.k2[i]);
        }
        field.apply(t0 + C3 * dt, &self.tmp, &mut self.k3);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * (A41 * self.k1[i] + A42 * self.k2[i] + A43 * self.k3[i]);
        }
        field.apply(t0 + C4 * dt, &self.tmp, &mut self.k4);

        for i in 0..state.len() {
            self.tmp[i] = state[i]
                + dt * (A51 * self.k1[i] + A52 * self.k2[i] + A53 * self.k3[i] + A54 * self.k4[i]);
        }
        field.apply(t0 + C5 * dt, &self.tmp, &mut self.k5);

        for i in 0..state.len() {
            self.tmp[i] = state[i]
                + dt * (A61 * self.k1[i]
                    + A62 * self.k2[i]
                    + A63 * self.k3[i]
                    + A64 * self.k4[i]
                    + A65 * self.k5[i]);
        }
        field.apply(t0 + dt, &self.tmp, &mut self.k6);
    }

    fn combine(&self, state: &[f64], dt: f64, next: &mut [f64]) {
        for i in 0..state.len() {
            next[i] = state[i]
                + dt * (B1 * self.k1[i]
                    + B2 * self.k2[i]
                    + B3 * self.k3[i]
                    + B4 * self.k4[i]
                    + B5 * self.k5[i]
                    + B6 * self.k6[i]);
        }
    }

    /// Takes a trial step of size `dt` from `(t0, state)`, writing the 5th order
    /// solution into `next` and evaluating the final stage needed by
    /// [`Tsit5::error_norm`]. `state` is left untouched so a rejected step costs
    /// nothing to undo.
    pub fn trial_step(
        &mut self,
        field: &impl VectorField,
        t0: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
    ) {
        self.compute_stages(field, t0, state, dt);
        self.combine(state, dt, next);
        field.apply(t0 + dt, next, &mut self.k7);
    }

    /// RMS norm of the local error of the last trial step, scaled component-wise
    /// by `abs_tol + rel_tol * max(|y|, |y_next|)`. A value <= 1 means the step
    /// meets the tolerance.
    pub fn error_norm(
        &self,
        state: &[f64],
        next: &[f64],
        dt: f64,
        abs_tol: f64,
        rel_tol: f64,
    ) -> f64 {
        if state.is_empty() {
            return 0.0;
        }
        let mut sum = 0.0;
        for i in 0..state.len() {
            let err = dt
                * (E1 * self.k1[i]
                    + E2 * self.k2[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]
                    + E7 * self.k7[i]);
            let scale = abs_tol + rel_tol * state[i].abs().max(next[i].abs());
            let ratio = err / scale;
            sum += ratio * ratio;
        }
        (sum / state.len() as f64).sqrt()
    }
}
