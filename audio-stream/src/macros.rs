/// Macro to use for modules constrained to the ALSA backend.
macro_rules! cfg_alsa {
    ($($item:item)*) => {
        $(
            #[cfg(all(feature = "alsa", target_os = "linux"))]
            #[cfg_attr(docsrs, doc(
                cfg(all(feature = "alsa", target_os = "linux"))
            ))]
            $item
        )*
    }
}

/// Macro to use for modules constrained to the CoreAudio backend.
macro_rules! cfg_coreaudio {
    ($($item:item)*) => {
        $(
            #[cfg(all(feature = "coreaudio", target_os = "macos"))]
            #[cfg_attr(docsrs, doc(
                cfg(all(feature = "coreaudio", target_os = "macos"))
            ))]
            $item
        )*
    }
}

/// Convert a negative return value from a C API into a [Status][crate::Status]
/// error.
#[allow(unused_macros)]
macro_rules! status {
    ($expr:expr) => {{
        let result = $expr;

        if result < 0 {
            Err(crate::Status::new(result as i32))
        } else {
            Ok(result)
        }
    }};
}

/// Convert a non-zero `OSStatus` into a [Status][crate::Status] error.
#[allow(unused_macros)]
macro_rules! os_status {
    ($expr:expr) => {{
        let result = $expr;

        if result != 0 {
            Err(crate::Status::new(result as i32))
        } else {
            Ok(())
        }
    }};
}
