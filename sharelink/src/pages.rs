//! Server-rendered HTML pages.
//!
//! Templates are compiled into the binary and rendered with minijinja, which escapes every
//! interpolated value in `.html` templates. File names and display names are user input.

use axum::response::Html;
use minijinja::{Environment, Value, context};

use crate::{api::models::files::FileResponse, backend::identity::Identity, errors::Error};

const TEMPLATES: &[(&str, &str)] = &[
    ("base.html", include_str!("../templates/base.html")),
    ("landing.html", include_str!("../templates/landing.html")),
    ("dashboard.html", include_str!("../templates/dashboard.html")),
    ("file.html", include_str!("../templates/file.html")),
    ("not_found.html", include_str!("../templates/not_found.html")),
    ("loading.html", include_str!("../templates/loading.html")),
];

pub struct Pages {
    env: Environment<'static>,
}

impl Pages {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: Value) -> Result<Html<String>, Error> {
        let template = self.env.get_template(name).map_err(|e| Error::Internal {
            operation: format!("load template {name}: {e}"),
        })?;

        let html = template.render(ctx).map_err(|e| Error::Internal {
            operation: format!("render template {name}: {e}"),
        })?;

        Ok(Html(html))
    }

    pub fn landing(&self, identity: Option<&Identity>, allow_registration: bool) -> Result<Html<String>, Error> {
        self.render("landing.html", context! { identity, allow_registration })
    }

    pub fn dashboard(&self, identity: &Identity, files: &[FileResponse], max_file_size: &str) -> Result<Html<String>, Error> {
        self.render("dashboard.html", context! { identity, files, max_file_size })
    }

    pub fn file(&self, identity: Option<&Identity>, file: &FileResponse) -> Result<Html<String>, Error> {
        self.render("file.html", context! { identity, file })
    }

    pub fn not_found(&self) -> Result<Html<String>, Error> {
        self.render("not_found.html", context! {})
    }

    pub fn loading(&self) -> Result<Html<String>, Error> {
        self.render("loading.html", context! {})
    }
}
