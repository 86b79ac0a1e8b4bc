//! C-API for external test runners.
//!
//! Every conformance scenario is exported as
//! `char* pgharness_orm_<scenario>(const char* conn)`. A NULL return means
//! the scenario passed; anything else is the error text, which the caller
//! must release with `pgharness_free()`.
//!
//! ```c
//! char* err = pgharness_orm_first("postgres://localhost:5432/db");
//! if (err != NULL) {
//!     fprintf(stderr, "%s\n", err);
//!     pgharness_free(err);
//! }
//! ```

// FFI functions check pointers before dereferencing, clippy doesn't understand this pattern
#![allow(clippy::not_unsafe_ptr_arg_deref)]

use crate::conformance::Scenario;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

fn into_c_string(message: String) -> *mut c_char {
    CString::new(message.replace('\0', "\\0"))
        .unwrap_or_default()
        .into_raw()
}

fn read_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(format!("NULL {}", what));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| format!("Invalid UTF-8 in {}: {}", what, e))
}

fn run_scenario(scenario: Scenario, conn: *const c_char) -> *mut c_char {
    let url = match read_str(conn, "connection string") {
        Ok(url) => url,
        Err(message) => return into_c_string(message),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return into_c_string(format!("failed to start runtime: {}", e)),
    };

    match runtime.block_on(scenario.run(url)) {
        Ok(()) => std::ptr::null_mut(),
        Err(e) => into_c_string(e.to_string()),
    }
}

macro_rules! export_scenarios {
    ($($name:ident => $scenario:ident),* $(,)?) => {
        $(
            #[doc = concat!("Run the `", stringify!($scenario), "` scenario. NULL on success.")]
            #[unsafe(no_mangle)]
            pub extern "C" fn $name(conn: *const c_char) -> *mut c_char {
                run_scenario(Scenario::$scenario, conn)
            }
        )*
    };
}

export_scenarios! {
    pgharness_orm_create_blog_and_user => CreateBlogAndUser,
    pgharness_orm_first => First,
    pgharness_orm_query_all_data_types => QueryAllDataTypes,
    pgharness_orm_query_nulls_all_data_types => QueryNullsAllDataTypes,
    pgharness_orm_insert_all_data_types => InsertAllDataTypes,
    pgharness_orm_insert_nulls_all_data_types => InsertNullsAllDataTypes,
    pgharness_orm_update_all_data_types => UpdateAllDataTypes,
    pgharness_orm_delete => Delete,
    pgharness_orm_create_in_batches => CreateInBatches,
    pgharness_orm_transaction => Transaction,
    pgharness_orm_nested_transaction => NestedTransaction,
    pgharness_orm_error_in_transaction => ErrorInTransaction,
    pgharness_orm_read_only_transaction => ReadOnlyTransaction,
}

/// Run a scenario by name (e.g. `"nested_transaction"`). NULL on success.
#[unsafe(no_mangle)]
pub extern "C" fn pgharness_orm_run(name: *const c_char, conn: *const c_char) -> *mut c_char {
    let parsed = read_str(name, "scenario name")
        .and_then(|n| n.parse::<Scenario>().map_err(|e| e.to_string()));
    let scenario = match parsed {
        Ok(scenario) => scenario,
        Err(message) => return into_c_string(message),
    };
    run_scenario(scenario, conn)
}

/// Free a string returned by pgharness functions.
/// Safe to call with NULL.
#[unsafe(no_mangle)]
pub extern "C" fn pgharness_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            drop(CString::from_raw(ptr));
        }
    }
}

/// Get the library version string.
/// Caller must free the returned string with pgharness_free().
#[unsafe(no_mangle)]
pub extern "C" fn pgharness_version() -> *mut c_char {
    into_c_string(env!("CARGO_PKG_VERSION").to_string())
}
