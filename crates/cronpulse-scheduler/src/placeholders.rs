//! `{{ name }}` placeholders in URLs, header values and bodies, rendered with
//! minijinja at invocation time.
//!
//! Rendering is strict: a text that names an unknown variable or does not
//! parse as a template is sent exactly as written, and a warning is logged.
//! Dates are taken on the wall clock of the configured time zone.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use cronpulse_core::cron::Tz;
use minijinja::{context, Environment, UndefinedBehavior, Value};
use tracing::warn;

/// Values that depend on the invocation rather than the clock.
#[derive(Debug, Clone, Copy)]
pub struct PlaceholderContext<'a> {
    pub now: DateTime<Utc>,
    pub timezone: Tz,
    pub execution_id: &'a str,
    pub attempt: u32,
}

impl PlaceholderContext<'_> {
    /// The template context for one invocation.
    pub fn values(&self) -> Value {
        let local = self.now.with_timezone(&self.timezone);
        context! {
            today => local.format("%Y-%m-%d").to_string(),
            yesterday => (local - Duration::days(1)).format("%Y-%m-%d").to_string(),
            tomorrow => (local + Duration::days(1)).format("%Y-%m-%d").to_string(),
            now => local.to_rfc3339_opts(SecondsFormat::Secs, true),
            timestamp => self.now.timestamp(),
            year => local.format("%Y").to_string(),
            month => local.format("%m").to_string(),
            day => local.format("%d").to_string(),
            hour => local.format("%H").to_string(),
            minute => local.format("%M").to_string(),
            execution_id => self.execution_id,
            attempt => self.attempt,
        }
    }
}

/// Renders invocation texts against a [`PlaceholderContext`].
#[derive(Debug)]
pub struct PlaceholderRenderer {
    env: Environment<'static>,
}

impl PlaceholderRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        // Request bodies keep their exact trailing bytes.
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Render `text` with `values` (from [`PlaceholderContext::values`]).
    pub fn render(&self, text: &str, values: &Value) -> String {
        if !["{{", "{%", "{#"].iter().any(|open| text.contains(open)) {
            return text.to_owned();
        }
        match self.env.render_str(text, values) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(error = %e, "placeholder rendering failed, sending text as written");
                text.to_owned()
            }
        }
    }
}

impl Default for PlaceholderRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> PlaceholderContext<'static> {
        PlaceholderContext {
            now: Utc.with_ymd_and_hms(2026, 3, 1, 7, 5, 9).unwrap(),
            timezone: Tz::UTC,
            execution_id: "exec-1",
            attempt: 2,
        }
    }

    fn render(text: &str, ctx: &PlaceholderContext<'_>) -> String {
        PlaceholderRenderer::new().render(text, &ctx.values())
    }

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(render("http://svc/run", &ctx()), "http://svc/run");
        assert_eq!(render(r#"{"a": {"b": 1}}"#, &ctx()), r#"{"a": {"b": 1}}"#);
    }

    #[test]
    fn date_placeholders_resolve() {
        assert_eq!(
            render("/report?from={{ yesterday }}&to={{today}}", &ctx()),
            "/report?from=2026-02-28&to=2026-03-01"
        );
        assert_eq!(render("{{ tomorrow }}", &ctx()), "2026-03-02");
        assert_eq!(
            render("{{year}}/{{month}}/{{day}} {{hour}}:{{minute}}", &ctx()),
            "2026/03/01 07:05"
        );
        assert_eq!(render("{{ now }}", &ctx()), "2026-03-01T07:05:09Z");
        assert_eq!(render("{{ timestamp }}", &ctx()), "1772348709");
    }

    #[test]
    fn invocation_placeholders_resolve() {
        assert_eq!(
            render(r#"{"run":"{{ execution_id }}","try":{{ attempt }}}"#, &ctx()),
            r#"{"run":"exec-1","try":2}"#
        );
    }

    #[test]
    fn filters_are_available() {
        assert_eq!(render("{{ today | replace('-', '') }}", &ctx()), "20260301");
        assert_eq!(render("{{ execution_id | upper }}", &ctx()), "EXEC-1");
    }

    #[test]
    fn unknown_or_broken_templates_are_sent_as_written() {
        assert_eq!(render("{{ mystery }}-{{ day }}", &ctx()), "{{ mystery }}-{{ day }}");
        assert_eq!(render("a {{ day", &ctx()), "a {{ day");
    }

    #[test]
    fn trailing_newline_is_kept() {
        assert_eq!(render("day={{ day }}\n", &ctx()), "day=01\n");
    }

    #[test]
    fn dates_follow_the_configured_zone() {
        let mut late = ctx();
        late.now = Utc.with_ymd_and_hms(2026, 3, 1, 20, 30, 0).unwrap();
        late.timezone = "Asia/Tokyo".parse().unwrap();
        // 20:30 UTC is 05:30 the next morning in Tokyo.
        assert_eq!(render("{{ today }} {{ hour }}", &late), "2026-03-02 05");
        assert_eq!(render("{{ now }}", &late), "2026-03-02T05:30:00+09:00");
        assert_eq!(render("{{ timestamp }}", &late), late.now.timestamp().to_string());
    }
}
