#![allow(dead_code)]

use modbus_regmap::ClientOptions;
use modbus_regmap_mock::SimDevice;

pub const UUID: &str = "11111111-2222-3333-4444-555555555555";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A small device map: legend, typed registers, and `filler` plain counters
/// so the download spans several map windows.
pub fn sample_map(filler: usize) -> Vec<String> {
    let mut lines = vec![
        "# title: modbus register map for Sim Pump".to_string(),
        format!("# uuid: {UUID}"),
        r#"10,2,2,1,"TEMP","<f,*0.001,+200","C","{value:.2f}","Temperature""#.to_string(),
        r#"12,1,1,0,"SPEED",">H","rpm","","Motor speed""#.to_string(),
        r#"13,1,1,1,"SETPOINT",">h","","","Setpoint""#.to_string(),
        r#"14,4,4,0,"NAME",">8s","","","Device name""#.to_string(),
        r#"18,2,2,0,"PAIR",">2H","","","Two words""#.to_string(),
        r#"20,1,1,0,"CMD",">H#","","","Write only command""#.to_string(),
    ];
    for i in 0..filler {
        lines.push(format!(r#"{},1,1,0,"F{i}",">H","","","Filler""#, 100 + i));
    }
    lines
}

/// Device serving `sample_map` with known register contents.
pub fn sample_device(filler: usize) -> SimDevice {
    let dev = SimDevice::new().with_map(&sample_map(filler));
    // 1000.0f32 little endian: 00 00 7A 44
    dev.set_words(10, &[0x0000, 0x7A44]);
    dev.set_words(12, &[1500]);
    dev.set_words(13, &[0xFFF6]);
    dev.set_words(14, &[0x5055, 0x4D50, 0x0000, 0x0000]);
    dev.set_words(18, &[1, 2]);
    dev
}

pub fn options(cache_dir: &std::path::Path) -> ClientOptions {
    ClientOptions::new().with_cache_dir(cache_dir)
}
