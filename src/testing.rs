static INIT: std::sync::Once = std::sync::Once::new();

pub fn init_test() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        let _ = color_eyre::install();
    });
}
