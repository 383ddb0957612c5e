use time::Date;

/// A tracked solar plant, identified by its vendor station code.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Plant {
    /// Station code in `NE=<digits>` form.
    pub code: String,
    /// First day the backfill covers when nothing is stored yet.
    pub start_date: Date,
    /// Nameplate capacity; only consumed by downstream consolidation.
    pub capacity_kwp: Option<f64>,
}
