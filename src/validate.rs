//! Form validation. Problems are collected per field and returned to the
//! client for inline display rather than raised as errors.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schedule::todos::{default_time_slots, parse_slot};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^@\s]+@[^@\s]+\.[^@\s]+").unwrap());

pub const MIN_AGE: u32 = 10;
pub const MAX_AGE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    fn finish<T>(self, value: T) -> Result<T, Self> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }

    pub fn messages(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.message.as_str()).collect()
    }
}

pub fn is_email_valid(email: &str) -> bool {
    EMAIL.is_match(email)
}

#[derive(Debug, Deserialize)]
pub struct RegistrationForm {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub name: String,
    pub email: String,
}

pub fn validate_registration(form: &RegistrationForm) -> Result<Registration, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let email = form.email.trim();
    if !is_email_valid(email) {
        errors.add("email", "Invalid email");
    }
    let name = form.name.trim();
    if name.is_empty() {
        errors.add("name", "Please enter your name");
    }
    errors.finish(Registration {
        name: name.to_string(),
        email: email.to_lowercase(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Onboarding form as typed by the user. Age arrives as text or a number.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingForm {
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub age: Value,
    #[serde(default)]
    pub emergency_contact_name: String,
    #[serde(default)]
    pub emergency_contact_email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Onboarding {
    pub gender: Gender,
    pub age: u32,
    pub emergency_contact_name: String,
    pub emergency_contact_email: String,
}

fn parse_age(raw: &Value) -> Option<u32> {
    let age = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    let in_range = age.is_finite() && (f64::from(MIN_AGE)..=f64::from(MAX_AGE)).contains(&age);
    in_range.then_some(age as u32)
}

pub fn validate_onboarding(form: &OnboardingForm) -> Result<Onboarding, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let gender = Gender::parse(&form.gender);
    if gender.is_none() {
        errors.add("gender", "Please select your gender");
    }
    let age = parse_age(&form.age);
    if age.is_none() {
        errors.add("age", format!("Please enter a valid age ({MIN_AGE}-{MAX_AGE})"));
    }

    let name = form.emergency_contact_name.trim();
    let email = form.emergency_contact_email.trim();
    if name.is_empty() || email.is_empty() {
        errors.add("emergencyContact", "Please fill in all fields");
    } else if !is_email_valid(email) {
        errors.add("emergencyContactEmail", "Emergency contact email is invalid");
    }

    match (gender, age) {
        (Some(gender), Some(age)) => errors.finish(Onboarding {
            gender,
            age,
            emergency_contact_name: name.to_string(),
            emergency_contact_email: email.to_lowercase(),
        }),
        _ => Err(errors),
    }
}

/// A reviewed prescription the user wants to start tracking.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub pill_name: String,
    #[serde(default)]
    pub dosage_info: String,
    pub dosage: u32,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub start_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub time_slots: Option<Vec<String>>,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub side_effects: Vec<String>,
}

/// Checks a schedule and returns its normalised `HH:MM` time slots, one per
/// daily dose.
pub fn validate_schedule(req: &ScheduleRequest) -> Result<Vec<String>, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if req.pill_name.trim().is_empty() {
        errors.add("pillName", "Please enter the medicine name");
    }
    if req.dosage == 0 {
        errors.add("dosage", "Dosage must be at least one dose per day");
    }

    let slots = match &req.time_slots {
        Some(slots) => {
            let parsed: Vec<Option<String>> = slots
                .iter()
                .map(|s| parse_slot(s).map(|t| t.format("%H:%M").to_string()))
                .collect();
            if parsed.iter().any(Option::is_none) {
                errors.add("timeSlots", "Times must be in HH:MM format");
            }
            if slots.len() != req.dosage as usize {
                errors.add("timeSlots", "Please set a time for each daily dose");
            }
            parsed.into_iter().flatten().collect()
        }
        None => default_time_slots(req.dosage).unwrap_or_else(|| {
            errors.add("timeSlots", "Please set a time for each daily dose");
            Vec::new()
        }),
    };
    errors.finish(slots)
}
