#![cfg(test)]

use super::smearing::{occupation_divided_difference, Smearing, DEGENERACY_THRESHOLD};

#[test]
fn occupation_values_bracket_the_fermi_level() {
    for smearing in [Smearing::FermiDirac, Smearing::Gaussian] {
        assert!(smearing.occupation(-8.0) > 0.999);
        assert!(smearing.occupation(8.0) < 1e-3);
        assert!((smearing.occupation(0.0) - 0.5).abs() < 1e-12);
    }
    assert_eq!(Smearing::None.occupation(-1.0), 1.0);
    assert_eq!(Smearing::None.occupation(1.0), 0.0);
}

#[test]
fn derivative_is_nonpositive_and_matches_finite_difference() {
    let h = 1e-6;
    for smearing in [Smearing::FermiDirac, Smearing::Gaussian] {
        for &x in &[-2.0, -0.3, 0.0, 0.7, 3.0] {
            let analytic = smearing.occupation_derivative(x);
            assert!(analytic <= 0.0, "derivative must be non-positive at {x}");
            let numeric = (smearing.occupation(x + h) - smearing.occupation(x - h)) / (2.0 * h);
            assert!(
                (analytic - numeric).abs() < 1e-8,
                "derivative mismatch at {x}: analytic {analytic}, numeric {numeric}"
            );
        }
    }
}

#[test]
fn divided_difference_converges_to_the_derivative() {
    let fermi_level = 0.3;
    let temperature = 0.05;
    let filling = 2.0;
    let eps = 0.34;
    for smearing in [Smearing::FermiDirac, Smearing::Gaussian] {
        let occupation =
            |e: f64| filling * smearing.occupation((e - fermi_level) / temperature);
        let limit = filling
            * smearing.occupation_derivative((eps - fermi_level) / temperature)
            / temperature;
        let mut previous_error = f64::INFINITY;
        for &delta in &[1e-2, 1e-3, 1e-4, 1e-5] {
            let dd = occupation_divided_difference(
                smearing,
                occupation(eps),
                occupation(eps + delta),
                eps,
                eps + delta,
                fermi_level,
                temperature,
                filling,
            );
            let error = (dd - limit).abs();
            assert!(
                error < previous_error + 1e-12,
                "error must shrink with delta; got {error} after {previous_error}"
            );
            previous_error = error;
        }
        assert!(previous_error < 1e-4 * limit.abs());
    }
}

#[test]
fn degenerate_energies_fall_back_to_the_derivative() {
    let fermi_level = 0.0;
    let temperature = 0.1;
    let filling = 1.0;
    let eps = 0.05;
    let occ = filling * Smearing::FermiDirac.occupation(eps / temperature);
    let dd = occupation_divided_difference(
        Smearing::FermiDirac,
        occ,
        occ,
        eps,
        eps,
        fermi_level,
        temperature,
        filling,
    );
    let expected =
        filling * Smearing::FermiDirac.occupation_derivative(eps / temperature) / temperature;
    assert!(
        (dd - expected).abs() < 1e-14,
        "degenerate branch must return the analytic derivative"
    );

    // continuity across the threshold
    let delta = 2.0 * DEGENERACY_THRESHOLD;
    let occ_b = filling * Smearing::FermiDirac.occupation((eps + delta) / temperature);
    let quotient = occupation_divided_difference(
        Smearing::FermiDirac,
        occ,
        occ_b,
        eps,
        eps + delta,
        fermi_level,
        temperature,
        filling,
    );
    assert!((quotient - expected).abs() < 1e-5 * expected.abs());
}

#[test]
fn zero_temperature_uses_step_occupations() {
    let fermi_level = 0.0;
    // straddling the Fermi level: plain quotient of the step
    let dd = occupation_divided_difference(
        Smearing::None,
        1.0,
        0.0,
        -0.5,
        0.5,
        fermi_level,
        0.0,
        1.0,
    );
    assert!((dd + 1.0).abs() < 1e-14);
    // degenerate limit only exists distributionally: returns zero
    let dd = occupation_divided_difference(
        Smearing::None,
        1.0,
        1.0,
        -0.5,
        -0.5,
        fermi_level,
        0.0,
        1.0,
    );
    assert_eq!(dd, 0.0);
}
