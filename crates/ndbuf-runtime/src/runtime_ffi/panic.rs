//! Fatal diagnostics for the ndbuf runtime

use std::process;
use std::slice;

use tracing::error;

/// Report a fatal error and terminate the program.
///
/// # Safety
/// This function never returns. The msg pointer must point to valid UTF-8 data
/// of at least `len` bytes, or can be null (in which case a generic message is used).
#[no_mangle]
pub unsafe extern "C" fn ndbuf_panic(msg: *const u8, len: usize) -> ! {
    let text = if msg.is_null() || len == 0 {
        "Unknown error".to_string()
    } else {
        let bytes = slice::from_raw_parts(msg, len);
        match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => "<invalid UTF-8 message>".to_string(),
        }
    };
    report_and_exit(&text)
}

/// Terminate the program with `message` from Rust code.
pub(crate) fn fatal(message: &str) -> ! {
    report_and_exit(message)
}

fn report_and_exit(message: &str) -> ! {
    error!(reason = message, "fatal ndbuf runtime error");

    eprintln!();
    eprintln!("==========================================");
    eprintln!("NDBUF RUNTIME ERROR");
    eprintln!("==========================================");
    eprintln!();
    eprintln!("Error: {}", message);
    eprintln!();
    eprintln!("Generated code passed an invalid request to the");
    eprintln!("array runtime and cannot continue execution.");
    eprintln!("==========================================");

    process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The panic entry point exits the process, so it only runs on request.
    #[test]
    #[ignore]
    fn test_panic_with_message() {
        unsafe {
            let msg = b"Test panic message";
            ndbuf_panic(msg.as_ptr(), msg.len());
        }
    }
}
