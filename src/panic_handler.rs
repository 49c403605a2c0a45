use log::error;
use std::panic;
use std::thread;

/// Prefix of render worker thread names
pub const RENDER_THREAD_PREFIX: &str = "render-";

pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let current = thread::current();
        let name = current.name().unwrap_or("<unnamed>");
        error!("Panic in thread {name}: {panic_info}");

        // Worker panics are caught and reported per page
        if is_render_worker(name) {
            return;
        }
        default_hook(panic_info);
    }));
}

fn is_render_worker(thread_name: &str) -> bool {
    thread_name.starts_with(RENDER_THREAD_PREFIX)
}
