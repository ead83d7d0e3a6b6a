//! Macros for building and returning [`crate::error::TopologyError`] values.

/// Creates a [`crate::error::TopologyError`] from an error kind and a static description.
///
/// Dynamic detail can be attached as a third argument (anything implementing `ToString`) or
/// moved in with `detail =`. A source error can be attached with `source:`.
#[macro_export]
macro_rules! topology_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::TopologyError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::TopologyError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        $crate::error::TopologyError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        $crate::error::TopologyError::from(($kind, $desc, $detail)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::TopologyError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::TopologyError::from(($kind, $desc, $detail.to_string()))
            .with_source($source)
    };
}

/// Creates a [`crate::error::TopologyError`] and returns it from the current function.
///
/// Accepts the same arguments as [`topology_error!`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::topology_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::topology_error!($kind, $desc, source: $source))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        return ::core::result::Result::Err($crate::topology_error!($kind, $desc, detail = $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::topology_error!(
            $kind,
            $desc,
            detail = $detail,
            source: $source
        ))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::topology_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::topology_error!(
            $kind,
            $desc,
            $detail,
            source: $source
        ))
    };
}
