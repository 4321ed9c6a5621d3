//! Localized email rendering for lifecycle notifications.
//!
//! Templates are compiled into the binary, one subject/body pair per
//! notification kind and language. Unknown languages fall back to English.

use minijinja::{context, Environment};

use crate::models::{NotificationEvent, NotificationKind};
use crate::notify::{NotifyError, OutboundEmail};

const DEFAULT_LANGUAGE: &str = "en";

const TEMPLATES: &[(&str, &str)] = &[
    (
        "en/reminder_subject.txt",
        "{% if overdue %}Overdue: {{ course_name }}{% else %}Reminder: {{ course_name }}{% endif %}",
    ),
    (
        "en/reminder_body.txt",
        "Hi {{ name }},\n\n\
         {% if overdue -%}\n\
         Your deadline to finish {{ course_name }} passed {{ days_delta }} day{{ days_delta|pluralize }} ago.\n\
         {%- else -%}\n\
         You have {{ days_delta }} day{{ days_delta|pluralize }} left to finish {{ course_name }}.\n\
         {%- endif %}\n\
         Learners are expected to complete this course within {{ finish_days }} days of enrolling.\n\
         {%- if re_enroll_interval %}\n\
         Once completed, you will be re-enrolled after {{ re_enroll_interval }} {{ re_enroll_unit }}{{ re_enroll_interval|pluralize }}.\n\
         {%- endif %}\n",
    ),
    (
        "en/re_enrollment_subject.txt",
        "You have been re-enrolled in {{ course_name }}",
    ),
    (
        "en/re_enrollment_body.txt",
        "Hi {{ name }},\n\n\
         It has been {{ elapsed }} {{ re_enroll_unit }}{{ elapsed|pluralize }} since you completed {{ course_name }}, \
         so you have been re-enrolled and your previous progress has been cleared.\n\
         {%- if finish_days %}\n\
         Please complete the course again within {{ finish_days }} days.\n\
         {%- endif %}\n",
    ),
    (
        "es/reminder_subject.txt",
        "{% if overdue %}Atrasado: {{ course_name }}{% else %}Recordatorio: {{ course_name }}{% endif %}",
    ),
    (
        "es/reminder_body.txt",
        "Hola {{ name }},\n\n\
         {% if overdue -%}\n\
         El plazo para terminar {{ course_name }} venció hace {{ days_delta }} día{{ days_delta|pluralize }}.\n\
         {%- else -%}\n\
         Te queda{{ days_delta|pluralize(\"\", \"n\") }} {{ days_delta }} día{{ days_delta|pluralize }} para terminar {{ course_name }}.\n\
         {%- endif %}\n\
         Este curso debe completarse dentro de los {{ finish_days }} días posteriores a la inscripción.\n",
    ),
    (
        "es/re_enrollment_subject.txt",
        "Te hemos reinscrito en {{ course_name }}",
    ),
    (
        "es/re_enrollment_body.txt",
        "Hola {{ name }},\n\n\
         Han pasado {{ elapsed }} \
         {% if re_enroll_unit == \"year\" %}año{{ elapsed|pluralize }}{% else %}mes{{ elapsed|pluralize(\"\", \"es\") }}{% endif %} \
         desde que completaste {{ course_name }}, \
         por lo que te hemos reinscrito y tu progreso anterior se ha borrado.\n",
    ),
];

pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Result<Self, NotifyError> {
        let mut env = Environment::new();
        env.add_filter("pluralize", pluralize);
        for (name, source) in TEMPLATES {
            env.add_template(*name, *source)
                .map_err(|e| NotifyError::Template(e.to_string()))?;
        }
        Ok(Self { env })
    }

    pub fn render(&self, event: &NotificationEvent) -> Result<OutboundEmail, NotifyError> {
        let language = self.language_for(event.language.as_deref());
        let (kind, ctx) = match event.kind {
            NotificationKind::Reminder {
                overdue,
                days_delta,
            } => (
                "reminder",
                context! {
                    name => event.recipient_name,
                    course_name => event.course_name,
                    overdue,
                    days_delta,
                    finish_days => event.finish_days,
                    re_enroll_interval => event.re_enroll_interval,
                    re_enroll_unit => event.re_enroll_unit.as_str(),
                },
            ),
            NotificationKind::ReEnrollment { elapsed } => (
                "re_enrollment",
                context! {
                    name => event.recipient_name,
                    course_name => event.course_name,
                    elapsed,
                    finish_days => event.finish_days,
                    re_enroll_interval => event.re_enroll_interval,
                    re_enroll_unit => event.re_enroll_unit.as_str(),
                },
            ),
        };

        let subject = self.render_one(&format!("{language}/{kind}_subject.txt"), &ctx)?;
        let body = self.render_one(&format!("{language}/{kind}_body.txt"), &ctx)?;

        Ok(OutboundEmail {
            to: event.recipient_email.clone(),
            subject: subject.trim().to_string(),
            body,
        })
    }

    /// Maps a learner preference like `es-MX` onto a bundled language.
    fn language_for<'a>(&self, preference: Option<&'a str>) -> &'a str {
        let Some(preference) = preference else {
            return DEFAULT_LANGUAGE;
        };
        let primary = preference.split(['-', '_']).next().unwrap_or_default();
        if !primary.is_empty()
            && self
                .env
                .get_template(&format!("{primary}/reminder_subject.txt"))
                .is_ok()
        {
            primary
        } else {
            DEFAULT_LANGUAGE
        }
    }

    fn render_one(&self, name: &str, ctx: &minijinja::Value) -> Result<String, NotifyError> {
        self.env
            .get_template(name)
            .and_then(|template| template.render(ctx))
            .map_err(|e| NotifyError::Template(e.to_string()))
    }
}

/// `{{ n|pluralize }}` -> "" for one, "s" otherwise. Custom suffixes may be
/// passed as `pluralize(singular, plural)`.
fn pluralize(count: i64, singular: Option<String>, plural: Option<String>) -> String {
    if count == 1 {
        singular.unwrap_or_default()
    } else {
        plural.unwrap_or_else(|| "s".to_string())
    }
}
