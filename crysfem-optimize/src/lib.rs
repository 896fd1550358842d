/// Newton-Raphson iteration for fallible nonlinear systems, with optional line search
pub mod newton;
