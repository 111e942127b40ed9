#![allow(non_snake_case)]
use RustedMultiLarge::Examples::multilarge_examples::multilarge_examples;

fn main() {
    let example = 0;
    match example {
        // Gaussian peak on 100 000 points, J^T J accumulated in parallel blocks
        0 => multilarge_examples(0),
        // Rosenbrock with and without geodesic acceleration, history saved to csv
        1 => multilarge_examples(1),
        // Tikhonov regularized exponential fit
        2 => multilarge_examples(2),
        // linear least squares: normal equations vs TSQR, L-curve
        3 => multilarge_examples(3),
        // settings from a TOML task
        4 => multilarge_examples(4),
        _ => {
            for i in 0..5 {
                multilarge_examples(i);
            }
        }
    }
}
