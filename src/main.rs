// main.rs — the lumeq driver.
//
// Flow: parse args → load image → (16-bit? normalize to 8-bit) →
// (colour? split YCbCr, equalize luma only) → run the GPU pipeline →
// print intermediate vectors and per-kernel timings → display
// before/after windows → optionally save.
//
// Usage:
//   lumeq [-l] [-d <index>] [-f <file>] [-b <bins>] [-o <file>] [--no-display]

use std::env;
use std::process;

use minifb::{Key, Window, WindowOptions};

use lumeq::color;
use lumeq::gpu::device::{list_adapters, GpuDevice};
use lumeq::gpu::equalize::GpuEqualizePipeline;
use lumeq::image::Image;

/// Vectors longer than this are summarized instead of printed in full.
const MAX_VECTOR_PRINT: usize = 500;

fn print_usage(program: &str) {
    eprintln!("Usage: {program} [options]");
    eprintln!("  -l              list GPU adapters and exit");
    eprintln!("  -d <index>      select adapter by index (default: auto)");
    eprintln!("  -f <file>       input image (default: test.pgm)");
    eprintln!("  -b <bins>       histogram bins, power of two in 2..=256 (default: 256)");
    eprintln!("  -o <file>       save the equalized image");
    eprintln!("  --no-display    skip the before/after windows");
    eprintln!("  -h              print this message and exit");
}

struct Args {
    list: bool,
    adapter: Option<usize>,
    file: String,
    bins: usize,
    output: Option<String>,
    display: bool,
}

fn parse_args() -> Result<Args, String> {
    let argv: Vec<String> = env::args().collect();
    let mut args = Args {
        list: false,
        adapter: None,
        file: "test.pgm".to_string(),
        bins: 256,
        output: None,
        display: true,
    };

    let take_value = |it: &mut std::slice::Iter<'_, String>, flag: &str| {
        it.next()
            .cloned()
            .ok_or_else(|| format!("{flag} requires a value"))
    };

    let mut it = argv[1..].iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-l" => args.list = true,
            "-d" => {
                let v = take_value(&mut it, "-d")?;
                args.adapter =
                    Some(v.parse().map_err(|_| format!("invalid adapter index: {v}"))?);
            }
            "-f" => args.file = take_value(&mut it, "-f")?,
            "-b" => {
                let v = take_value(&mut it, "-b")?;
                args.bins = v.parse().map_err(|_| format!("invalid bin count: {v}"))?;
            }
            "-o" => args.output = Some(take_value(&mut it, "-o")?),
            "--no-display" => args.display = false,
            "-h" | "--help" => {
                print_usage(&argv[0]);
                process::exit(0);
            }
            other => return Err(format!("unknown option: {other} (try -h)")),
        }
    }
    Ok(args)
}

fn main() {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("[lumeq] {e}");
            process::exit(1);
        }
    };
    if let Err(e) = run(&args) {
        eprintln!("[lumeq] error: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.list {
        let adapters = list_adapters();
        if adapters.is_empty() {
            eprintln!("[lumeq] no adapters found");
        }
        for a in adapters {
            println!("{a}");
        }
        return Ok(());
    }

    // --- Load ---
    let decoded = image::open(&args.file)
        .map_err(|e| format!("failed to load '{}': {e}", args.file))?;
    let width = decoded.width() as usize;
    let height = decoded.height() as usize;
    eprintln!(
        "[lumeq] loaded {} ({width}x{height}, {:?})",
        args.file,
        decoded.color()
    );

    let is_color = decoded.color().has_color();
    let sixteen_bit = decoded.color().bits_per_pixel() / decoded.color().channel_count() as u16 > 8;

    // Keep the original RGB around for the "before" window and chroma
    // recombination; grayscale inputs skip this.
    let rgb_before: Option<Vec<u8>> = is_color.then(|| decoded.to_rgb8().into_raw());

    // The working luma plane, always 8-bit.
    let (luma, chroma): (Image<u8>, Option<(Image<u8>, Image<u8>)>) = if is_color {
        let planes = color::split_ycbcr(rgb_before.as_ref().unwrap(), width, height);
        eprintln!("[lumeq] colour input: equalizing the Y plane only");
        (planes.y, Some((planes.cb, planes.cr)))
    } else if sixteen_bit {
        let gray16 = decoded.to_luma16();
        let img16 = Image::from_vec(width, height, gray16.into_raw());
        if img16.max_value().is_some_and(|m| m > 255) {
            eprintln!("[lumeq] 16-bit input: normalizing value range to 8-bit");
        }
        (color::compact_to_u8(&img16), None)
    } else {
        let gray = decoded.to_luma8();
        (Image::from_vec(width, height, gray.into_raw()), None)
    };

    // --- GPU pipeline ---
    let gpu = GpuDevice::with_adapter(args.adapter)?;
    eprintln!(
        "[lumeq] adapter: {} ({:?}), kernel timing: {}",
        gpu.adapter_info.name,
        gpu.adapter_info.backend,
        if gpu.supports_timestamps() { "gpu timestamps" } else { "host wall clock" }
    );

    let pipeline = GpuEqualizePipeline::new(&gpu);
    let out = pipeline.run(&gpu, &luma, args.bins)?;

    // --- Report ---
    print_vector("histogram", &out.histogram);
    print_vector("cumulative (serial)", &out.cumulative);
    print_vector("cumulative (Blelloch, exclusive)", &out.cumulative_blelloch);
    print_vector("cumulative (Hillis-Steele)", &out.cumulative_hillis_steele);
    print_vector("lut", &out.lut);

    println!("{}", out.upload);
    for t in &out.timings {
        println!("{t}");
    }
    // Upload plus the consumed kernels; the two comparison scans are
    // reported above but not part of the total.
    println!("TOTAL: execution time [ns]: {}", out.total_nanos());

    // --- Recombine / save / display ---
    let rgb_after: Option<Vec<u8>> = chroma
        .as_ref()
        .map(|(cb, cr)| color::recombine_ycbcr(&out.image, cb, cr));

    if let Some(path) = &args.output {
        save_output(path, &out.image, rgb_after.as_deref(), width, height)?;
        eprintln!("[lumeq] saved {path}");
    }

    if args.display {
        let before = match &rgb_before {
            Some(rgb) => rgb_to_framebuffer(rgb),
            None => luma_to_framebuffer(&luma),
        };
        let after = match &rgb_after {
            Some(rgb) => rgb_to_framebuffer(rgb),
            None => luma_to_framebuffer(&out.image),
        };
        show_windows(&before, &after, width, height)?;
    }

    Ok(())
}

/// Print a vector like the timing report does, unless it is too long to
/// be useful on a terminal.
fn print_vector(name: &str, v: &[u32]) {
    if v.len() > MAX_VECTOR_PRINT {
        println!("{name}: [{} elements, not printed]", v.len());
    } else {
        println!("{name}: {v:?}");
    }
}

fn save_output(
    path: &str,
    gray: &Image<u8>,
    rgb: Option<&[u8]>,
    width: usize,
    height: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    match rgb {
        Some(rgb) => {
            let buf = image::RgbImage::from_raw(width as u32, height as u32, rgb.to_vec())
                .ok_or("internal error: RGB buffer size mismatch")?;
            buf.save(path)?;
        }
        None => {
            let mut data = Vec::with_capacity(width * height);
            data.extend(gray.pixels());
            let buf = image::GrayImage::from_raw(width as u32, height as u32, data)
                .ok_or("internal error: gray buffer size mismatch")?;
            buf.save(path)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// Pack a grayscale image into a 0x00RRGGBB framebuffer.
fn luma_to_framebuffer(img: &Image<u8>) -> Vec<u32> {
    let mut fb = Vec::with_capacity(img.num_pixels());
    for y in 0..img.height() {
        for x in 0..img.width() {
            let v = img.get(x, y) as u32;
            fb.push((v << 16) | (v << 8) | v);
        }
    }
    fb
}

/// Pack interleaved RGB into a 0x00RRGGBB framebuffer.
fn rgb_to_framebuffer(rgb: &[u8]) -> Vec<u32> {
    rgb.chunks_exact(3)
        .map(|p| ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32)
        .collect()
}

/// Show the input and output side by side until both are closed or
/// ESC/Q is pressed in either.
fn show_windows(
    before: &[u32],
    after: &[u32],
    width: usize,
    height: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut win_before = Window::new(
        "lumeq — input",
        width,
        height,
        WindowOptions::default(),
    )?;
    let mut win_after = Window::new(
        "lumeq — equalized",
        width,
        height,
        WindowOptions::default(),
    )?;
    win_before.set_target_fps(30);
    win_after.set_target_fps(30);

    eprintln!("[lumeq] press ESC or Q to quit");
    while win_before.is_open() || win_after.is_open() {
        let quit = |w: &Window| w.is_key_down(Key::Escape) || w.is_key_down(Key::Q);
        if (win_before.is_open() && quit(&win_before))
            || (win_after.is_open() && quit(&win_after))
        {
            break;
        }
        if win_before.is_open() {
            win_before.update_with_buffer(before, width, height)?;
        }
        if win_after.is_open() {
            win_after.update_with_buffer(after, width, height)?;
        }
    }
    Ok(())
}
