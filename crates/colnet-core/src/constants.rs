//! Physical constants and conventional field names.

use crate::FloatValue;

/// Specific heat of dry air at constant pressure
/// unit: J / kg / K
pub const CP: FloatValue = 1004.0;

/// Latent heat of vaporisation used to convert latent heat flux to evaporation
/// unit: J / kg
pub const LATENT_HEAT_VAPORIZATION: FloatValue = 2.51e6;

/// unit: s / day
pub const SECONDS_PER_DAY: FloatValue = 86400.0;

/// g / kg per kg / kg
pub const GRAMS_PER_KILOGRAM: FloatValue = 1000.0;

/// Default floor applied to total water by the moisture correction
/// unit: g / kg
pub const DEFAULT_MOISTURE_FLOOR: FloatValue = 1e-9;

/// Liquid-water static energy (K)
pub const FIELD_SL: &str = "sl";
/// Total water mixing ratio (g / kg)
pub const FIELD_QT: &str = "qt";

/// Prognostic fields in the order used to pack network inputs and outputs
pub const PROGNOSTIC_FIELDS: [&str; 2] = [FIELD_SL, FIELD_QT];

/// Sensible heat flux (W / m^2)
pub const DRIVER_SHF: &str = "SHF";
/// Latent heat flux (W / m^2)
pub const DRIVER_LHF: &str = "LHF";
/// Top of atmosphere insolation (W / m^2)
pub const DRIVER_SOLIN: &str = "SOLIN";

/// Evaporation implied by a latent heat flux.
///
/// $$ E = \frac{LHF \cdot 86400}{L_v} $$
///
/// unit: mm / day (kg / m^2 / day)
pub fn evaporation(lhf: FloatValue) -> FloatValue {
    lhf * SECONDS_PER_DAY / LATENT_HEAT_VAPORIZATION
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;

    #[test]
    fn evaporation_from_latent_heat() {
        // 2.51e6 J/kg over one day
        assert!(is_close!(evaporation(LATENT_HEAT_VAPORIZATION / SECONDS_PER_DAY), 1.0));
        assert_eq!(evaporation(0.0), 0.0);
    }
}
