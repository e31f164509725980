//! Server-rendered dashboard pages
//!
//! Templates are compiled into the binary and rendered with Handlebars,
//! which HTML-escapes every `{{value}}`. Page bodies are rendered first and
//! then wrapped in the shared layout.

use handlebars::Handlebars;
use serde::Serialize;
use serde_json::json;

use crate::error::{AppError, Result};

pub mod components;
pub mod web;

pub use web::configure;

const TEMPLATES: [(&str, &str); 7] = [
    ("layout", include_str!("../../templates/layout.hbs")),
    ("home", include_str!("../../templates/home.hbs")),
    ("login", include_str!("../../templates/login.hbs")),
    ("patients", include_str!("../../templates/patients.hbs")),
    ("patient_detail", include_str!("../../templates/patient_detail.hbs")),
    ("alerts", include_str!("../../templates/alerts.hbs")),
    ("devices", include_str!("../../templates/devices.hbs")),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Home,
    Login,
    Patients,
    PatientDetail,
    Alerts,
    Devices,
}

impl Page {
    fn template(&self) -> &'static str {
        match self {
            Page::Home => "home",
            Page::Login => "login",
            Page::Patients => "patients",
            Page::PatientDetail => "patient_detail",
            Page::Alerts => "alerts",
            Page::Devices => "devices",
        }
    }

    /// Sidebar entry highlighted for the page
    fn section(&self) -> &'static str {
        match self {
            Page::Home | Page::Login => "home",
            Page::Patients | Page::PatientDetail => "patients",
            Page::Alerts => "alerts",
            Page::Devices => "devices",
        }
    }

    fn has_sidebar(&self) -> bool {
        !matches!(self, Page::Login)
    }
}

pub struct Pages {
    registry: Handlebars<'static>,
}

impl Pages {
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();
        for (name, source) in TEMPLATES {
            registry
                .register_template_string(name, source)
                .map_err(|e| AppError::TemplateRegistration(Box::new(e)))?;
        }
        Ok(Self { registry })
    }

    pub fn render<T: Serialize>(&self, page: Page, data: &T) -> Result<String> {
        let body = self.registry.render(page.template(), data)?;
        let html = self.registry.render(
            "layout",
            &json!({
                "body": body,
                "nav": page.has_sidebar(),
                "active": page.section(),
            }),
        )?;
        Ok(html)
    }
}
