//! Modal Legendre basis on the reference interval `[-1, 1]`.

/// Values `P_0(xi) ..= P_order(xi)`.
pub fn legendre(order: usize, xi: f64) -> Vec<f64> {
    let mut p = Vec::with_capacity(order + 1);
    p.push(1.0);
    if order >= 1 {
        p.push(xi);
    }
    for k in 1..order {
        let k_f = k as f64;
        let next = ((2.0 * k_f + 1.0) * xi * p[k] - k_f * p[k - 1]) / (k_f + 1.0);
        p.push(next);
    }
    p
}

/// Derivatives `P_0'(xi) ..= P_order'(xi)`, via `P_{n+1}' = (n + 1) P_n + xi P_n'`.
pub fn legendre_derivatives(order: usize, xi: f64) -> Vec<f64> {
    let p = legendre(order, xi);
    let mut dp = Vec::with_capacity(order + 1);
    dp.push(0.0);
    for n in 0..order {
        dp.push((n as f64 + 1.0) * p[n] + xi * dp[n]);
    }
    dp
}

/// Values at the right end point, all one.
pub fn right_trace(order: usize) -> Vec<f64> {
    vec![1.0; order + 1]
}

/// Values at the left end point, `(-1)^n`.
pub fn left_trace(order: usize) -> Vec<f64> {
    (0..=order)
        .map(|n| if n % 2 == 0 { 1.0 } else { -1.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_order_polynomials() {
        let xi = 0.3;
        let p = legendre(3, xi);
        assert!((p[2] - 0.5 * (3.0 * xi * xi - 1.0)).abs() < 1e-15);
        assert!((p[3] - 0.5 * (5.0 * xi * xi * xi - 3.0 * xi)).abs() < 1e-15);
        let dp = legendre_derivatives(3, xi);
        assert!((dp[2] - 3.0 * xi).abs() < 1e-15);
        assert!((dp[3] - 0.5 * (15.0 * xi * xi - 3.0)).abs() < 1e-14);
    }

    #[test]
    fn end_point_values() {
        assert_eq!(legendre(4, 1.0), right_trace(4));
        assert_eq!(legendre(4, -1.0), left_trace(4));
    }

    #[test]
    fn orthogonality_under_gauss_quadrature() {
        let (weights, points) = fenris_quadrature::univariate::gauss(4);
        for i in 0..=3 {
            for j in 0..=3 {
                let s: f64 = weights
                    .iter()
                    .zip(&points)
                    .map(|(w, x)| {
                        let p = legendre(3, x[0]);
                        w * p[i] * p[j]
                    })
                    .sum();
                let expected = if i == j { 2.0 / (2.0 * i as f64 + 1.0) } else { 0.0 };
                assert!((s - expected).abs() < 1e-14);
            }
        }
    }
}
