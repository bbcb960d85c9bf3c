/// Build the User-Agent string sent with every request: product/version
/// plus coarse platform info so server logs can classify the client.
pub fn user_agent() -> String {
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;

    let platform_info = match os {
        "linux" => format!("X11; Linux {}", arch),
        "macos" => format!("Macintosh; Mac OS X {}", arch),
        "windows" => format!("Windows NT; {}", arch),
        _ => format!("{} {}", os, arch),
    };

    format!(
        "Trawler/{} ({})",
        env!("CARGO_PKG_VERSION"),
        platform_info
    )
}
