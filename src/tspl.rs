//! TSPL command-string builders for Alpha-2R class label printers.
//!
//! Thin formatting helpers: each function returns a ready-to-send command
//! line. The transport treats these as opaque payloads; nothing here touches
//! connection state.

/// `TEXT x,y,"font",rotation,x_mul,y_mul,"content"`
pub fn text(
    x: u32,
    y: u32,
    font: &str,
    rotation: u32,
    x_multiply: u32,
    y_multiply: u32,
    content: &str,
) -> String {
    format!("TEXT {x},{y},\"{font}\",{rotation},{x_multiply},{y_multiply},\"{content}\"\n")
}

/// `BARCODE x,y,"type",height,readable,rotation,narrow,wide,"content"`
#[allow(clippy::too_many_arguments)]
pub fn barcode(
    x: u32,
    y: u32,
    code_type: &str,
    height: u32,
    human_readable: u32,
    rotation: u32,
    narrow: u32,
    wide: u32,
    content: &str,
) -> String {
    format!(
        "BARCODE {x},{y},\"{code_type}\",{height},{human_readable},{rotation},{narrow},{wide},\"{content}\"\n"
    )
}

/// `RSS x,y,"sym",rotate,pix_mult,sep_height,line_height,"content"`
#[allow(clippy::too_many_arguments)]
pub fn rss(
    x: u32,
    y: u32,
    sym: &str,
    rotate: u32,
    pix_mult: u32,
    sep_height: u32,
    line_height: u32,
    content: &str,
) -> String {
    format!("RSS {x},{y},\"{sym}\",{rotate},{pix_mult},{sep_height},{line_height},\"{content}\"\n")
}

/// `BLOCK x,y,width,height,"font",rotation,x_mul,y_mul,space,fit,"content"`
#[allow(clippy::too_many_arguments)]
pub fn block(
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    font: &str,
    rotation: u32,
    x_multiply: u32,
    y_multiply: u32,
    space: u32,
    fit: u32,
    content: &str,
) -> String {
    format!(
        "BLOCK {x},{y},{width},{height},\"{font}\",{rotation},{x_multiply},{y_multiply},{space},{fit},\"{content}\"\n"
    )
}

/// `BOX x,y,x_end,y_end,thickness`
pub fn box_frame(x: u32, y: u32, x_end: u32, y_end: u32, line_thickness: u32) -> String {
    format!("BOX {x},{y},{x_end},{y_end},{line_thickness}\n")
}

/// `REVERSE x,y,x_end,y_end`
pub fn reverse(x: u32, y: u32, x_end: u32, y_end: u32) -> String {
    format!("REVERSE {x},{y},{x_end},{y_end}\n")
}

/// `QRCODE x,y,ecc,cell_width,mode,rotation,model,"content"`
///
/// The content is emitted quoted, as the TSPL manual specifies; some
/// front-ends send it bare, which the firmware happens to tolerate, but the
/// quoted form is the documented one and is deliberate here.
#[allow(clippy::too_many_arguments)]
pub fn qrcode(
    x: u32,
    y: u32,
    ecc_level: char,
    cell_width: u32,
    mode: char,
    rotation: u32,
    model: &str,
    content: &str,
) -> String {
    format!("QRCODE {x},{y},{ecc_level},{cell_width},{mode},{rotation},{model},\"{content}\"\n")
}

/// `CIRCLE x,y,diameter,thickness`
pub fn circle(x_start: u32, y_start: u32, diameter: u32, thickness: u32) -> String {
    format!("CIRCLE {x_start},{y_start},{diameter},{thickness}\n")
}

/// `PRINT labels,copies` — runs the print job for the buffered label.
pub fn print(label_count: u32, copy_count: u32) -> String {
    format!("PRINT {label_count},{copy_count}\n")
}

/// `SET item action`, e.g. `SET REPRINT ON`.
pub fn set(item: &str, action: &str) -> String {
    format!("SET {item} {action}\n")
}

/// `CLS` — clears the printer's image buffer.
pub fn cls() -> String {
    "CLS\n".to_string()
}

/// `FORMFEED`
pub fn formfeed() -> String {
    "FORMFEED\n".to_string()
}

/// `SIZE width,height` (inches).
pub fn size(width: f32, height: f32) -> String {
    format!("SIZE {width},{height}\n")
}

/// `DIRECTION n`
pub fn direction(direction: u32) -> String {
    format!("DIRECTION {direction}\n")
}

/// `PUTPCX x,y,"file"` — places a previously downloaded PCX file.
pub fn putpcx(x: u32, y: u32, file_name: &str) -> String {
    format!("PUTPCX {x},{y},\"{file_name}\"\n")
}

/// `KILL location,"name"` — deletes downloaded files.
pub fn kill(store_location: char, file_name: &str) -> String {
    format!("KILL {store_location},\"{file_name}\"\n")
}

/// `DOWNLOAD location,"file",length,` — the header that must immediately
/// precede the file's raw bytes on the wire.
pub fn download_header(store_location: char, file_name: &str, byte_length: usize) -> String {
    format!("DOWNLOAD {store_location},\"{file_name}\",{byte_length},")
}

/// Composes one payload that downloads a PCX image to the printer's flash
/// and places it on the label: `DOWNLOAD` header, raw file bytes, `PUTPCX`.
/// The caller supplies the file contents; fetching them is out of scope.
pub fn pcx_payload(file_name: &str, x: u32, y: u32, data: &[u8]) -> Vec<u8> {
    let header = download_header('F', file_name, data.len());
    let trailer = putpcx(x, y, file_name);
    let mut payload = Vec::with_capacity(header.len() + data.len() + trailer.len() + 1);
    payload.extend_from_slice(header.as_bytes());
    payload.extend_from_slice(data);
    payload.push(b'\n');
    payload.extend_from_slice(trailer.as_bytes());
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_renders_quoted_font_and_content() {
        assert_eq!(
            text(1320, 40, "3", 90, 1, 1, "www.example.com"),
            "TEXT 1320,40,\"3\",90,1,1,\"www.example.com\"\n"
        );
    }

    #[test]
    fn barcode_renders_all_fields() {
        assert_eq!(
            barcode(1230, 880, "UPCA", 60, 1, 90, 2, 2, "512300211784"),
            "BARCODE 1230,880,\"UPCA\",60,1,90,2,2,\"512300211784\"\n"
        );
    }

    #[test]
    fn buffer_and_print_commands() {
        assert_eq!(cls(), "CLS\n");
        assert_eq!(print(1, 1), "PRINT 1,1\n");
        assert_eq!(set("REPRINT", "ON"), "SET REPRINT ON\n");
        assert_eq!(direction(1), "DIRECTION 1\n");
        assert_eq!(size(1.89, 6.875), "SIZE 1.89,6.875\n");
        assert_eq!(kill('F', "*"), "KILL F,\"*\"\n");
    }

    #[test]
    fn qrcode_quotes_its_content() {
        assert_eq!(
            qrcode(200, 900, 'L', 8, 'M', 90, "M2", "B0026http://www.instagram.com"),
            "QRCODE 200,900,L,8,M,90,M2,\"B0026http://www.instagram.com\"\n"
        );
    }

    #[test]
    fn pcx_payload_sandwiches_file_bytes() {
        let data = [0x0A, 0x05, 0x01];
        let payload = pcx_payload("COUPON.PCX", 0, 20, &data);
        let header = b"DOWNLOAD F,\"COUPON.PCX\",3,";
        assert!(payload.starts_with(header));
        assert_eq!(&payload[header.len()..header.len() + 3], &data);
        assert!(payload.ends_with(b"\nPUTPCX 0,20,\"COUPON.PCX\"\n"));
    }
}
