//! Archive name templates.
//!
//! A name template is plain text with `${variable}` placeholders:
//!
//! ```text
//! ${appPkg}-${flavorName}-${buildType}-v${versionName}-${versionCode}
//! ```
//!
//! Only a fixed set of variables exists:
//!
//! | Variable | Value |
//! |----------|-------|
//! | `appName` | name of the application module |
//! | `projectName` | name of the root project |
//! | `flavorName` | flavor of the variant |
//! | `buildType` | build type of the variant |
//! | `versionName` | version name, after any build-number suffix |
//! | `versionCode` | integer version code |
//! | `appPkg` | application id |
//! | `buildTime` | render time as `YYYY-MM-DD-HH-MM-SS` |
//!
//! Templates are parsed up front so that a typo fails the whole run before
//! any variant is touched. A `$` that does not open a placeholder is kept
//! as-is.

use time::OffsetDateTime;
use time::macros::format_description;

use crate::types::{BuildVariant, PackError};

/// File extension appended to every rendered archive name.
pub const ARCHIVE_EXTENSION: &str = "apk";

/// A variable recognized in name templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateVar {
    AppName,
    ProjectName,
    FlavorName,
    BuildType,
    VersionName,
    VersionCode,
    AppPkg,
    BuildTime,
}

impl TemplateVar {
    /// Looks up a variable by its placeholder name.
    pub fn from_name(name: &str) -> Option<Self> {
        let var = match name {
            "appName" => TemplateVar::AppName,
            "projectName" => TemplateVar::ProjectName,
            "flavorName" => TemplateVar::FlavorName,
            "buildType" => TemplateVar::BuildType,
            "versionName" => TemplateVar::VersionName,
            "versionCode" => TemplateVar::VersionCode,
            "appPkg" => TemplateVar::AppPkg,
            "buildTime" => TemplateVar::BuildTime,
            _ => return None,
        };
        Some(var)
    }

    /// Placeholder name of the variable.
    pub fn name(&self) -> &'static str {
        match self {
            TemplateVar::AppName => "appName",
            TemplateVar::ProjectName => "projectName",
            TemplateVar::FlavorName => "flavorName",
            TemplateVar::BuildType => "buildType",
            TemplateVar::VersionName => "versionName",
            TemplateVar::VersionCode => "versionCode",
            TemplateVar::AppPkg => "appPkg",
            TemplateVar::BuildTime => "buildTime",
        }
    }
}

/// Values available to a single render.
///
/// `buildTime` is not part of this struct; it is taken from the timestamp of
/// the render itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameVariables {
    pub app_name: Option<String>,
    pub project_name: Option<String>,
    pub flavor_name: Option<String>,
    pub build_type: Option<String>,
    pub version_name: Option<String>,
    pub version_code: Option<u32>,
    pub app_pkg: Option<String>,
}

impl NameVariables {
    /// Collects the variables of `variant`, plus the module and project names.
    ///
    /// A variant without flavor renders `flavorName` as an empty string.
    pub fn for_variant(
        variant: &BuildVariant,
        app_name: Option<&str>,
        project_name: Option<&str>,
    ) -> Self {
        Self {
            app_name: app_name.map(str::to_string),
            project_name: project_name.map(str::to_string),
            flavor_name: Some(variant.flavor_name.clone()),
            build_type: Some(variant.build_type.as_str().to_string()),
            version_name: Some(variant.version_name.clone()),
            version_code: Some(variant.version_code),
            app_pkg: Some(variant.application_id.clone()),
        }
    }

    fn lookup(&self, var: TemplateVar, build_time: &str) -> Option<String> {
        match var {
            TemplateVar::AppName => self.app_name.clone(),
            TemplateVar::ProjectName => self.project_name.clone(),
            TemplateVar::FlavorName => self.flavor_name.clone(),
            TemplateVar::BuildType => self.build_type.clone(),
            TemplateVar::VersionName => self.version_name.clone(),
            TemplateVar::VersionCode => self.version_code.map(|code| code.to_string()),
            TemplateVar::AppPkg => self.app_pkg.clone(),
            TemplateVar::BuildTime => Some(build_time.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(TemplateVar),
}

/// A parsed, validated name template.
///
/// # Example
///
/// ```
/// use flavorpack_sdk::naming::{NameTemplate, NameVariables};
///
/// let template = NameTemplate::parse("${appPkg}-v${versionName}")?;
/// let vars = NameVariables {
///     app_pkg: Some("com.x".into()),
///     version_name: Some("1.2".into()),
///     ..NameVariables::default()
/// };
/// assert_eq!(template.render(&vars)?, "com.x-v1.2");
/// # Ok::<(), flavorpack_sdk::PackError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl NameTemplate {
    /// Parses `template`, rejecting unknown variables.
    ///
    /// # Errors
    ///
    /// * [`PackError::UnknownVariable`] - a placeholder names an unsupported variable
    /// * [`PackError::Config`] - a `${` placeholder is never closed
    pub fn parse(template: &str) -> Result<Self, PackError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while let Some(start) = rest.find("${") {
            literal.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(PackError::Config(format!(
                    "unterminated placeholder in name template '{}'",
                    template
                )));
            };
            let name = after[..end].trim();
            let var = TemplateVar::from_name(name)
                .ok_or_else(|| PackError::UnknownVariable(name.to_string()))?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Var(var));
            rest = &after[end + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// The template text as configured.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Variables referenced by the template, in order of appearance.
    pub fn variables(&self) -> impl Iterator<Item = TemplateVar> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Var(var) => Some(*var),
            Segment::Literal(_) => None,
        })
    }

    /// Renders the template with `buildTime` set to the current time.
    pub fn render(&self, vars: &NameVariables) -> Result<String, PackError> {
        self.render_at(vars, now())
    }

    /// Renders the template with an explicit `buildTime`.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::MissingVariable`] if a referenced variable has no value.
    pub fn render_at(&self, vars: &NameVariables, time: OffsetDateTime) -> Result<String, PackError> {
        let build_time = format_build_time(time);
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(var) => {
                    let value = vars
                        .lookup(*var, &build_time)
                        .ok_or_else(|| PackError::MissingVariable(var.name().to_string()))?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }

    /// Renders the archive file name (`<rendered>.apk`) at `time`.
    pub fn archive_file_name(&self, vars: &NameVariables, time: OffsetDateTime) -> Result<String, PackError> {
        Ok(format!("{}.{}", self.render_at(vars, time)?, ARCHIVE_EXTENSION))
    }
}

/// Parses and renders `template` in one step.
///
/// ```
/// use flavorpack_sdk::naming::{render, NameVariables};
///
/// let vars = NameVariables { flavor_name: Some("prod".into()), ..NameVariables::default() };
/// assert_eq!(render("app-${flavorName}", &vars)?, "app-prod");
/// # Ok::<(), flavorpack_sdk::PackError>(())
/// ```
pub fn render(template: &str, vars: &NameVariables) -> Result<String, PackError> {
    NameTemplate::parse(template)?.render(vars)
}

/// Current time in the local offset, or UTC when the offset is unknown.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Formats a timestamp as `YYYY-MM-DD-HH-MM-SS`.
pub fn format_build_time(time: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]-[hour]-[minute]-[second]");
    time.format(format)
        .unwrap_or_else(|_| time.unix_timestamp().to_string())
}
