//! Mission plans and their row invariants.
//!
//! A [`MissionPlan`] is a tagged union over the four layout × operation
//! combinations.  Each variant carries only the fields its mode needs, so a
//! continuous plan can never hold a plant count and an individual plan can
//! never hold a scan step.  [`MissionPlan::validate`] enforces the numeric
//! invariants and reports the first violation as a [`PlanError`] whose
//! message is shown to the operator verbatim.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How many rows a mission traverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    SingleRow,
    MultiRow,
}

/// How stops are placed along a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// Stop every `scan_step_cm` regardless of plant positions.
    Continuous,
    /// Stop once per plant, `spacing_cm` apart.
    Individual,
}

/// Row parameters for continuous scanning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContinuousRow {
    /// Distance travelled between consecutive scans, in centimetres.
    pub scan_step_cm: f32,
    /// Known row length.  When absent the row ends on the side-sensor
    /// end-of-row heuristic.
    #[serde(default)]
    pub row_length_cm: Option<f32>,
}

/// Row parameters for per-plant scanning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IndividualRow {
    pub plant_count: u32,
    pub spacing_cm: f32,
}

/// Finite and strictly greater than zero.
fn positive(cm: f32) -> bool {
    cm.is_finite() && cm > 0.0
}

/// One row's traversal parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowSpec {
    Continuous(ContinuousRow),
    Individual(IndividualRow),
}

impl RowSpec {
    /// Distance between consecutive stops in this row.
    pub fn step_cm(&self) -> f32 {
        match self {
            RowSpec::Continuous(row) => row.scan_step_cm,
            RowSpec::Individual(row) => row.spacing_cm,
        }
    }

    fn validate(&self, row: usize) -> Result<(), PlanError> {
        match self {
            RowSpec::Continuous(spec) => {
                if !positive(spec.scan_step_cm) {
                    return Err(PlanError::ScanStep {
                        row,
                        value: spec.scan_step_cm,
                    });
                }
                if let Some(length) = spec.row_length_cm {
                    if !positive(length) {
                        return Err(PlanError::RowLength { row, value: length });
                    }
                }
            }
            RowSpec::Individual(spec) => {
                if spec.plant_count == 0 {
                    return Err(PlanError::PlantCount { row });
                }
                if !positive(spec.spacing_cm) {
                    return Err(PlanError::Spacing {
                        row,
                        value: spec.spacing_cm,
                    });
                }
            }
        }
        Ok(())
    }
}

/// A complete mission plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissionPlan {
    SingleRowContinuous {
        row: ContinuousRow,
    },
    SingleRowIndividual {
        row: IndividualRow,
    },
    MultiRowContinuous {
        rows: Vec<ContinuousRow>,
        inter_row_cm: f32,
    },
    MultiRowIndividual {
        rows: Vec<IndividualRow>,
        inter_row_cm: f32,
    },
}

impl MissionPlan {
    pub fn layout(&self) -> LayoutMode {
        match self {
            MissionPlan::SingleRowContinuous { .. } | MissionPlan::SingleRowIndividual { .. } => {
                LayoutMode::SingleRow
            }
            MissionPlan::MultiRowContinuous { .. } | MissionPlan::MultiRowIndividual { .. } => {
                LayoutMode::MultiRow
            }
        }
    }

    pub fn operation(&self) -> OperationMode {
        match self {
            MissionPlan::SingleRowContinuous { .. } | MissionPlan::MultiRowContinuous { .. } => {
                OperationMode::Continuous
            }
            MissionPlan::SingleRowIndividual { .. } | MissionPlan::MultiRowIndividual { .. } => {
                OperationMode::Individual
            }
        }
    }

    /// Number of rows in traversal order.
    pub fn row_count(&self) -> usize {
        match self {
            MissionPlan::SingleRowContinuous { .. } | MissionPlan::SingleRowIndividual { .. } => 1,
            MissionPlan::MultiRowContinuous { rows, .. } => rows.len(),
            MissionPlan::MultiRowIndividual { rows, .. } => rows.len(),
        }
    }

    /// The row at `index`, if any.
    pub fn row(&self, index: usize) -> Option<RowSpec> {
        match self {
            MissionPlan::SingleRowContinuous { row } => {
                (index == 0).then_some(RowSpec::Continuous(*row))
            }
            MissionPlan::SingleRowIndividual { row } => {
                (index == 0).then_some(RowSpec::Individual(*row))
            }
            MissionPlan::MultiRowContinuous { rows, .. } => {
                rows.get(index).copied().map(RowSpec::Continuous)
            }
            MissionPlan::MultiRowIndividual { rows, .. } => {
                rows.get(index).copied().map(RowSpec::Individual)
            }
        }
    }

    /// All rows in traversal order.
    pub fn rows(&self) -> Vec<RowSpec> {
        (0..self.row_count()).filter_map(|i| self.row(i)).collect()
    }

    /// Lateral distance between rows; `None` for single-row plans.
    pub fn inter_row_cm(&self) -> Option<f32> {
        match self {
            MissionPlan::MultiRowContinuous { inter_row_cm, .. }
            | MissionPlan::MultiRowIndividual { inter_row_cm, .. } => Some(*inter_row_cm),
            _ => None,
        }
    }

    /// Check every row invariant, returning the first violation.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.row_count() == 0 {
            return Err(PlanError::NoRows);
        }
        for (i, row) in self.rows().iter().enumerate() {
            row.validate(i + 1)?;
        }
        if let Some(inter_row) = self.inter_row_cm() {
            if !positive(inter_row) {
                return Err(PlanError::InterRow { value: inter_row });
            }
        }
        Ok(())
    }
}

/// A violated mission-plan invariant.  Row numbers are 1-based.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("mission plan must contain at least one row")]
    NoRows,

    #[error("row {row}: continuous mode requires a positive scan-step distance (got {value})")]
    ScanStep { row: usize, value: f32 },

    #[error("row {row}: row length must be positive when given (got {value})")]
    RowLength { row: usize, value: f32 },

    #[error("row {row}: individual mode requires a positive plant count (got 0)")]
    PlantCount { row: usize },

    #[error("row {row}: individual mode requires a positive plant spacing (got {value})")]
    Spacing { row: usize, value: f32 },

    #[error("multi-row plans require a positive inter-row distance (got {value})")]
    InterRow { value: f32 },

    #[error("single-row plans must describe exactly one row (got {0})")]
    SingleRowCount(usize),

    #[error("wizard payload is missing `{0}`")]
    MissingField(&'static str),

    #[error("unknown {field} '{value}'")]
    UnknownMode { field: &'static str, value: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Dashboard wizard payload
// ─────────────────────────────────────────────────────────────────────────────

/// The loosely-shaped plan the dashboard wizard submits.  Convert it with
/// [`MissionPlan::try_from`]; field presence is checked there, numeric
/// invariants by [`MissionPlan::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WizardPayload {
    #[serde(rename = "layoutMode")]
    pub layout_mode: String,
    #[serde(rename = "operationMode")]
    pub operation_mode: String,
    #[serde(default)]
    pub map: Vec<WizardRow>,
    #[serde(default)]
    pub scan_step_cm: Option<f32>,
    #[serde(default)]
    pub inter_row_cm: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WizardRow {
    #[serde(default)]
    pub num_plants: Option<u32>,
    #[serde(default)]
    pub spacing_cm: Option<f32>,
    #[serde(default)]
    pub total_length_cm: Option<f32>,
}

impl TryFrom<WizardPayload> for MissionPlan {
    type Error = PlanError;

    fn try_from(payload: WizardPayload) -> Result<Self, Self::Error> {
        let layout = match payload.layout_mode.as_str() {
            "single_row" => LayoutMode::SingleRow,
            "multi_row" => LayoutMode::MultiRow,
            other => {
                return Err(PlanError::UnknownMode {
                    field: "layoutMode",
                    value: other.to_string(),
                });
            }
        };
        if payload.map.is_empty() {
            return Err(PlanError::NoRows);
        }
        if layout == LayoutMode::SingleRow && payload.map.len() != 1 {
            return Err(PlanError::SingleRowCount(payload.map.len()));
        }

        match payload.operation_mode.as_str() {
            "continuous" => {
                let scan_step_cm = payload
                    .scan_step_cm
                    .ok_or(PlanError::MissingField("scan_step_cm"))?;
                let rows: Vec<ContinuousRow> = payload
                    .map
                    .iter()
                    .map(|r| ContinuousRow {
                        scan_step_cm,
                        row_length_cm: r.total_length_cm.filter(|l| *l > 0.0),
                    })
                    .collect();
                match layout {
                    LayoutMode::SingleRow => Ok(MissionPlan::SingleRowContinuous { row: rows[0] }),
                    LayoutMode::MultiRow => Ok(MissionPlan::MultiRowContinuous {
                        rows,
                        inter_row_cm: payload
                            .inter_row_cm
                            .ok_or(PlanError::MissingField("inter_row_cm"))?,
                    }),
                }
            }
            "individual" => {
                let rows = payload
                    .map
                    .iter()
                    .map(|r| {
                        Ok(IndividualRow {
                            plant_count: r.num_plants.ok_or(PlanError::MissingField("num_plants"))?,
                            spacing_cm: r.spacing_cm.ok_or(PlanError::MissingField("spacing_cm"))?,
                        })
                    })
                    .collect::<Result<Vec<_>, PlanError>>()?;
                match layout {
                    LayoutMode::SingleRow => Ok(MissionPlan::SingleRowIndividual { row: rows[0] }),
                    LayoutMode::MultiRow => Ok(MissionPlan::MultiRowIndividual {
                        rows,
                        inter_row_cm: payload
                            .inter_row_cm
                            .ok_or(PlanError::MissingField("inter_row_cm"))?,
                    }),
                }
            }
            other => Err(PlanError::UnknownMode {
                field: "operationMode",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn individual(plant_count: u32, spacing_cm: f32) -> MissionPlan {
        MissionPlan::SingleRowIndividual {
            row: IndividualRow {
                plant_count,
                spacing_cm,
            },
        }
    }

    #[test]
    fn valid_single_row_individual_passes() {
        let plan = individual(3, 50.0);
        assert!(plan.validate().is_ok());
        assert_eq!(plan.layout(), LayoutMode::SingleRow);
        assert_eq!(plan.operation(), OperationMode::Individual);
        assert_eq!(plan.row_count(), 1);
        assert!(plan.inter_row_cm().is_none());
    }

    #[test]
    fn continuous_requires_positive_scan_step() {
        for step in [0.0, -10.0, f32::NAN, f32::INFINITY] {
            let plan = MissionPlan::SingleRowContinuous {
                row: ContinuousRow {
                    scan_step_cm: step,
                    row_length_cm: None,
                },
            };
            assert!(matches!(plan.validate(), Err(PlanError::ScanStep { row: 1, .. })));
        }
    }

    #[test]
    fn individual_requires_plants_and_spacing() {
        assert_eq!(individual(0, 50.0).validate(), Err(PlanError::PlantCount { row: 1 }));
        assert!(matches!(
            individual(3, 0.0).validate(),
            Err(PlanError::Spacing { row: 1, .. })
        ));
        assert!(matches!(
            individual(3, f32::INFINITY).validate(),
            Err(PlanError::Spacing { row: 1, .. })
        ));
        let unbounded = MissionPlan::SingleRowContinuous {
            row: ContinuousRow {
                scan_step_cm: 20.0,
                row_length_cm: Some(f32::INFINITY),
            },
        };
        assert!(matches!(unbounded.validate(), Err(PlanError::RowLength { row: 1, .. })));
    }

    #[test]
    fn multi_row_requires_inter_row_distance() {
        let plan = MissionPlan::MultiRowIndividual {
            rows: vec![
                IndividualRow {
                    plant_count: 2,
                    spacing_cm: 40.0,
                },
                IndividualRow {
                    plant_count: 4,
                    spacing_cm: 40.0,
                },
            ],
            inter_row_cm: 0.0,
        };
        assert!(matches!(plan.validate(), Err(PlanError::InterRow { .. })));
        let MissionPlan::MultiRowIndividual { rows, .. } = plan else {
            unreachable!()
        };
        let plan = MissionPlan::MultiRowIndividual {
            rows,
            inter_row_cm: f32::INFINITY,
        };
        assert!(matches!(plan.validate(), Err(PlanError::InterRow { .. })));
    }

    #[test]
    fn multi_row_reports_offending_row_number() {
        let plan = MissionPlan::MultiRowContinuous {
            rows: vec![
                ContinuousRow {
                    scan_step_cm: 20.0,
                    row_length_cm: Some(200.0),
                },
                ContinuousRow {
                    scan_step_cm: 20.0,
                    row_length_cm: Some(-5.0),
                },
            ],
            inter_row_cm: 60.0,
        };
        assert_eq!(
            plan.validate().unwrap_err().to_string(),
            "row 2: row length must be positive when given (got -5)"
        );
    }

    #[test]
    fn empty_multi_row_rejected() {
        let plan = MissionPlan::MultiRowIndividual {
            rows: vec![],
            inter_row_cm: 50.0,
        };
        assert_eq!(plan.validate(), Err(PlanError::NoRows));
    }

    #[test]
    fn plan_json_is_tagged_by_kind() {
        let json = serde_json::to_value(individual(3, 50.0)).unwrap();
        assert_eq!(json["kind"], "single_row_individual");
        assert_eq!(json["row"]["plant_count"], 3);
    }

    #[test]
    fn wizard_continuous_payload_converts() {
        let payload: WizardPayload = serde_json::from_str(
            r#"{"layoutMode":"multi_row","operationMode":"continuous",
                "map":[{"total_length_cm":300},{"total_length_cm":0}],
                "scan_step_cm":25,"inter_row_cm":75}"#,
        )
        .unwrap();
        let plan = MissionPlan::try_from(payload).unwrap();
        assert_eq!(plan.row_count(), 2);
        assert_eq!(plan.inter_row_cm(), Some(75.0));
        match plan.row(1) {
            Some(RowSpec::Continuous(row)) => {
                assert_eq!(row.scan_step_cm, 25.0);
                assert!(row.row_length_cm.is_none());
            }
            other => panic!("unexpected row {other:?}"),
        }
    }

    #[test]
    fn wizard_payload_missing_fields_fail() {
        let payload = WizardPayload {
            layout_mode: "single_row".into(),
            operation_mode: "individual".into(),
            map: vec![WizardRow {
                num_plants: Some(3),
                ..Default::default()
            }],
            scan_step_cm: None,
            inter_row_cm: None,
        };
        assert_eq!(
            MissionPlan::try_from(payload),
            Err(PlanError::MissingField("spacing_cm"))
        );

        let payload = WizardPayload {
            layout_mode: "zigzag".into(),
            operation_mode: "individual".into(),
            map: vec![WizardRow::default()],
            scan_step_cm: None,
            inter_row_cm: None,
        };
        assert!(matches!(
            MissionPlan::try_from(payload),
            Err(PlanError::UnknownMode { field: "layoutMode", .. })
        ));
    }
}
