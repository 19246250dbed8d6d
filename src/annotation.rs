use std::fmt;

/// Kind of measurement requested at an annotated call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    Power,
    Energy,
    PowerDomain,
}

impl CallType {
    /// Field read from the node object of the payload.
    pub fn payload_field(&self) -> Option<&'static str> {
        match self {
            CallType::Power => Some("power_node_watts"),
            CallType::Energy => Some("energy_node_joules"),
            CallType::PowerDomain => None,
        }
    }

    /// Last header column of the CSV log.
    pub fn column_name(&self) -> Option<&'static str> {
        match self {
            CallType::Power => Some("Node_Power"),
            CallType::Energy => Some("Node_Energy"),
            CallType::PowerDomain => None,
        }
    }

    /// Suffix appended to the hostname to build the CSV log name.
    pub fn file_suffix(&self) -> Option<&'static str> {
        match self {
            CallType::Power => Some("power_data.csv"),
            CallType::Energy => Some("energy_data.csv"),
            CallType::PowerDomain => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Power => "power",
            CallType::Energy => "energy",
            CallType::PowerDomain => "power_domain",
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source location of an annotation, captured by [`call_site!`](crate::call_site).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
    pub function: &'static str,
}

impl CallSite {
    pub const fn new(file: &'static str, line: u32, function: &'static str) -> Self {
        Self { file, line, function }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.file, self.line, self.function)
    }
}

/// Reduce a `type_name` path such as `app::solver::step::{{closure}}` to `step`.
pub fn short_function_name(path: &'static str) -> &'static str {
    let mut path = path;
    while let Some(stripped) = path.strip_suffix("::{{closure}}") {
        path = stripped;
    }
    path.rsplit("::").next().unwrap_or(path)
}

/// Name of the enclosing function.
#[macro_export]
macro_rules! function_name {
    () => {{
        fn __here() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let path = __type_name_of(__here);
        $crate::annotation::short_function_name(path.strip_suffix("::__here").unwrap_or(path))
    }};
}

/// File, line and function of the macro invocation.
#[macro_export]
macro_rules! call_site {
    () => {
        $crate::annotation::CallSite::new(file!(), line!(), $crate::function_name!())
    };
}

/// Record node power at this call site.
///
/// Without arguments the process-wide annotator installed by
/// [`global::init`](crate::global::init) is used; errors are logged, never returned.
/// With an `&Annotator` argument the result of [`Annotator::annotate`](crate::Annotator::annotate)
/// is returned to the caller.
#[macro_export]
macro_rules! annotate_power {
    () => {
        $crate::global::annotate($crate::annotation::CallType::Power, $crate::call_site!())
    };
    ($annotator:expr) => {
        $annotator.annotate($crate::annotation::CallType::Power, $crate::call_site!())
    };
}

/// Record node energy at this call site. See [`annotate_power!`].
#[macro_export]
macro_rules! annotate_energy {
    () => {
        $crate::global::annotate($crate::annotation::CallType::Energy, $crate::call_site!())
    };
    ($annotator:expr) => {
        $annotator.annotate($crate::annotation::CallType::Energy, $crate::call_site!())
    };
}

/// Log the node power-domain description at this call site. No CSV row is written.
#[macro_export]
macro_rules! annotate_power_domain {
    () => {
        $crate::global::annotate($crate::annotation::CallType::PowerDomain, $crate::call_site!())
    };
    ($annotator:expr) => {
        $annotator.annotate($crate::annotation::CallType::PowerDomain, $crate::call_site!())
    };
}
