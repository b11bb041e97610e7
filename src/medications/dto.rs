use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    model::{parse_date, parse_times, Medication, MedicationPatch, NewMedication, TimeOfDay},
    services::VisibleMedications,
};
use crate::{
    error::{AppError, AppResult},
    users::PublicUser,
};

fn required(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::invalid(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

#[derive(Debug, Deserialize)]
pub struct CreateMedicationRequest {
    pub name: String,
    pub dose: String,
    pub times: Vec<String>,
    pub start_date: String,
    pub end_date: String,
}

impl CreateMedicationRequest {
    pub fn into_new(self, owner_id: Uuid) -> AppResult<NewMedication> {
        Ok(NewMedication {
            owner_id,
            name: required("name", &self.name)?,
            dose: required("dose", &self.dose)?,
            times: parse_times(&self.times)?,
            start_date: parse_date(&self.start_date)?,
            end_date: parse_date(&self.end_date)?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMedicationRequest {
    pub name: Option<String>,
    pub dose: Option<String>,
    pub times: Option<Vec<String>>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl TryFrom<UpdateMedicationRequest> for MedicationPatch {
    type Error = AppError;

    fn try_from(req: UpdateMedicationRequest) -> AppResult<Self> {
        Ok(Self {
            name: req.name.as_deref().map(|v| required("name", v)).transpose()?,
            dose: req.dose.as_deref().map(|v| required("dose", v)).transpose()?,
            times: req.times.as_deref().map(parse_times).transpose()?,
            start_date: req.start_date.as_deref().map(parse_date).transpose()?,
            end_date: req.end_date.as_deref().map(parse_date).transpose()?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub date: String,
    pub time: String,
}

impl ToggleRequest {
    pub fn parse(&self) -> AppResult<(time::Date, TimeOfDay)> {
        Ok((parse_date(&self.date)?, self.time.trim().parse::<TimeOfDay>()?))
    }
}

/// A medication with its derived `taken` flag.
#[derive(Debug, Serialize)]
pub struct MedicationView {
    #[serde(flatten)]
    pub medication: Medication,
    pub taken: bool,
}

impl From<Medication> for MedicationView {
    fn from(medication: Medication) -> Self {
        Self {
            taken: medication.taken(),
            medication,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SharedMedicationsView {
    pub user: PublicUser,
    pub medications: Vec<MedicationView>,
}

#[derive(Debug, Serialize)]
pub struct MedicationListResponse {
    pub own: Vec<MedicationView>,
    pub shared: Vec<SharedMedicationsView>,
}

impl From<VisibleMedications> for MedicationListResponse {
    fn from(v: VisibleMedications) -> Self {
        Self {
            own: v.own.into_iter().map(Into::into).collect(),
            shared: v
                .shared
                .into_iter()
                .map(|s| SharedMedicationsView {
                    user: s.user,
                    medications: s.medications.into_iter().map(Into::into).collect(),
                })
                .collect(),
        }
    }
}
