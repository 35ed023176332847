use tokio::runtime::{Builder, Runtime};

lazy_static! {
    static ref RUNTIME: Runtime = {
        let rt = Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to init tokio runtime.");
        log::trace!("tokio runtime initialized");
        rt
    };
}

/// Runtime shared by the rpc transport.
///
/// It is a current-thread runtime: the io and timer drivers only make
/// progress inside `block_on`, which is all a synchronous caller needs.
pub fn runtime() -> &'static Runtime {
    &RUNTIME
}
