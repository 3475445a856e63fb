use askama::Template;

use crate::routes::views::Nav;

pub struct SelectOption {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

pub struct FormField {
    pub label: &'static str,
    pub name: &'static str,
    pub kind: &'static str,
    pub value: String,
    pub checked: bool,
    pub options: Vec<SelectOption>,
}

impl FormField {
    fn input(kind: &'static str, name: &'static str, label: &'static str, value: &str) -> Self {
        Self {
            label,
            name,
            kind,
            value: value.to_string(),
            checked: false,
            options: Vec::new(),
        }
    }

    pub fn text(name: &'static str, label: &'static str, value: &str) -> Self {
        Self::input("text", name, label, value)
    }

    pub fn email(name: &'static str, label: &'static str, value: &str) -> Self {
        Self::input("email", name, label, value)
    }

    pub fn password(name: &'static str, label: &'static str) -> Self {
        Self::input("password", name, label, "")
    }

    pub fn textarea(name: &'static str, label: &'static str, value: &str) -> Self {
        Self::input("textarea", name, label, value)
    }

    pub fn checkbox(name: &'static str, label: &'static str, checked: bool) -> Self {
        Self {
            checked,
            ..Self::input("checkbox", name, label, "")
        }
    }

    pub fn select(name: &'static str, label: &'static str, options: Vec<SelectOption>) -> Self {
        Self {
            options,
            ..Self::input("select", name, label, "")
        }
    }
}

pub struct Link {
    pub href: String,
    pub label: String,
}

/// Every single-form page, and plain message pages (no fields).
#[derive(Template)]
#[template(path = "pages/form.html")]
pub struct FormPage {
    pub nav: Nav,
    pub heading: String,
    pub action: String,
    pub fields: Vec<FormField>,
    pub submit: &'static str,
    pub message: Option<String>,
    pub error: Option<String>,
    pub extra_links: Vec<Link>,
}

impl FormPage {
    pub fn new(nav: Nav, heading: &str, action: &str) -> Self {
        Self {
            nav,
            heading: heading.to_string(),
            action: action.to_string(),
            fields: Vec::new(),
            submit: "Submit",
            message: None,
            error: None,
            extra_links: Vec::new(),
        }
    }

    pub fn message(nav: Nav, heading: &str, message: &str) -> Self {
        Self::new(nav, heading, "").with_message(message)
    }

    pub fn field(mut self, field: FormField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn submit(mut self, label: &'static str) -> Self {
        self.submit = label;
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    pub fn link(mut self, href: &str, label: &str) -> Self {
        self.extra_links.push(Link {
            href: href.to_string(),
            label: label.to_string(),
        });
        self
    }
}
