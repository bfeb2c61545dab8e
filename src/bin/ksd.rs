use ks_led_controller::*;
use std::{env, io};

#[tokio::main]
async fn main() -> Result<()> {
    // Get a target address from command line arguments.
    // If not provided, exit.
    let usage = "Usage: ksd <address>";
    let args: Vec<_> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{usage}");
        std::process::exit(1);
    }
    if args[1] == "-h" || args[1] == "--help" {
        eprintln!("{usage}");
        std::process::exit(0);
    }

    // The daemon always targets the one device it was started for
    let controller = LampController::ble().await?;
    let selector = Selector::Address(args[1].clone());

    // Inform about successful initialization
    println!("OK");

    // Mainloop: wait for user input, line by line
    loop {
        // Read a command from stdin
        let mut input: String = String::new();
        if io::stdin().read_line(&mut input).expect("!!") == 0 {
            // EOF: the controlling process went away
            return Ok(());
        }

        // Read command and execute it
        let mut cmd = input.trim().split(':');
        let intent = match cmd.next() {
            Some("power_on") => Intent::PowerOn,
            Some("power_off") => Intent::PowerOff,
            Some("set_color") => {
                let Some(raw) = cmd.next() else {
                    eprintln!("ERR No color given");
                    continue;
                };
                let rgb: Vec<u8> = raw
                    .split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .collect();
                if rgb.len() != 3 {
                    eprintln!("ERR Invalid color format. Use R,G,B (e.g., 255,0,0 for red)");
                    continue;
                }
                Intent::SetColor {
                    color: Color::new(rgb[0], rgb[1], rgb[2]),
                    brightness: None,
                }
            }
            Some("set_brightness") => {
                let level: Option<u8> = cmd.next().and_then(|s| s.trim().parse().ok());
                let Some(brightness) = level.and_then(|l| Brightness::new(l).ok()) else {
                    eprintln!("ERR Brightness must be between 0 and 100");
                    continue;
                };
                Intent::SetBrightness(brightness)
            }
            Some("") | None => {
                eprintln!("ERR No command given");
                continue;
            }
            Some(other) => {
                eprintln!("ERR Unknown command: {other}");
                continue;
            }
        };

        // One fresh session per command; report the single outcome
        match controller.execute(&selector, &intent, None).await {
            Ok(outcomes) if outcomes.iter().all(|o| o.result.is_ok()) => println!("OK"),
            Ok(outcomes) => {
                for outcome in outcomes {
                    if let Err(e) = outcome.result {
                        eprintln!("ERR {e}");
                    }
                }
            }
            Err(e) => eprintln!("ERR {e}"),
        }
    }
}
