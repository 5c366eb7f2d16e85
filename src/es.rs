//! Elementary-stream header decoding: H.264 SPS and MPEG-2 sequence header.
//!
//! Both decoders read the raw payload without stripping emulation-prevention
//! bytes. The fields we need sit early in the header where emulation bytes
//! are rare; VUI timing sits late and is untrustworthy under that rule, so
//! H.264 framerate comes from a fixed broadcast-profile inference instead.

use crate::bits::BitCursor;
use crate::constants::{H264_HIGH_PROFILES, MPEG2_FPS_DEN, MPEG2_FPS_NUM};
use crate::metadata::VideoFormat;

/// Decode a sequence parameter set. `nal` starts at the NAL header byte
/// (unit type already checked by the caller). Truncated input degrades to
/// zero bits and still terminates; only an impossibly short slice is
/// rejected outright.
pub fn parse_avc_sps(nal: &[u8]) -> Option<VideoFormat> {
    if nal.len() < 5 {
        return None;
    }

    let mut br = BitCursor::new(&nal[1..]);

    let profile_idc = br.read_bits(8) as u8;
    br.skip(8); // constraint_set flags + reserved
    br.skip(8); // level_idc
    br.read_ue(); // seq_parameter_set_id

    if H264_HIGH_PROFILES.contains(&profile_idc) {
        let chroma_format_idc = br.read_ue();
        if chroma_format_idc == 3 {
            br.skip(1); // separate_colour_plane_flag
        }
        br.read_ue(); // bit_depth_luma_minus8
        br.read_ue(); // bit_depth_chroma_minus8
        br.skip(1); // qpprime_y_zero_transform_bypass_flag
        if br.read_bits(1) == 1 {
            // seq_scaling_matrix_present_flag
            let lists = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..lists {
                if br.read_bits(1) == 1 {
                    skip_scaling_list(&mut br, if i < 6 { 16 } else { 64 });
                }
            }
        }
    }

    br.read_ue(); // log2_max_frame_num_minus4
    match br.read_ue() {
        // pic_order_cnt_type
        0 => {
            br.read_ue(); // log2_max_pic_order_cnt_lsb_minus4
        }
        1 => {
            br.skip(1); // delta_pic_order_always_zero_flag
            br.read_ue(); // offset_for_non_ref_pic
            br.read_ue(); // offset_for_top_to_bottom_field
            let cycle = br.read_ue();
            // the standard caps the cycle length at 255; honoring the cap
            // keeps a truncated header from spinning through a huge count
            for _ in 0..cycle.min(255) {
                br.read_ue();
            }
        }
        _ => {}
    }

    br.read_ue(); // max_num_ref_frames
    br.skip(1); // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs_minus1 = br.read_ue();
    let pic_height_in_map_units_minus1 = br.read_ue();
    let frame_mbs_only = br.read_bits(1) == 1;
    let map_factor: u64 = if frame_mbs_only { 1 } else { 2 };

    let mut width = (pic_width_in_mbs_minus1 as u64 + 1) * 16;
    let mut height = (pic_height_in_map_units_minus1 as u64 + 1) * 16 * map_factor;

    if !frame_mbs_only {
        br.skip(1); // mb_adaptive_frame_field_flag
    }
    br.skip(1); // direct_8x8_inference_flag

    if br.read_bits(1) == 1 {
        // frame_cropping_flag
        let left = br.read_ue() as u64;
        let right = br.read_ue() as u64;
        let top = br.read_ue() as u64;
        let bottom = br.read_ue() as u64;
        width = width.saturating_sub((left + right) * 2);
        height = height.saturating_sub((top + bottom) * 2 * map_factor);
    }

    let interlaced = !frame_mbs_only;
    let (fps_num, fps_den) = infer_framerate(height as u32, interlaced);

    Some(VideoFormat {
        width: width as u32,
        height: height as u32,
        fps_num,
        fps_den,
        interlaced,
    })
}

/// Decode the fixed part of an MPEG-2 sequence header. `data` starts right
/// after the 0x000001B3 start code.
pub fn parse_mpeg2_seq(data: &[u8]) -> Option<VideoFormat> {
    if data.len() < 8 {
        return None;
    }

    // horizontal_size(12) + vertical_size(12) + aspect_ratio(4) + frame_rate_code(4)
    let width = ((data[0] as u32) << 4) | (data[1] as u32) >> 4;
    let height = ((data[1] as u32 & 0x0F) << 8) | data[2] as u32;
    let frame_rate_code = (data[3] & 0x0F) as usize;

    // codes 1..=8 map to the broadcast rates; 0 and the reserved codes
    // publish 0/1 and the header still counts as decoded
    let (fps_num, fps_den) = if frame_rate_code < MPEG2_FPS_NUM.len() {
        (MPEG2_FPS_NUM[frame_rate_code], MPEG2_FPS_DEN[frame_rate_code])
    } else {
        (0, 1)
    };

    Some(VideoFormat {
        width,
        height,
        fps_num,
        fps_den,
        interlaced: false,
    })
}

/// Consume one scaling list without keeping the coefficients.
fn skip_scaling_list(br: &mut BitCursor<'_>, len: u32) {
    let mut last_scale: u32 = 8;
    let mut next_scale: u32 = 8;
    for _ in 0..len {
        if next_scale != 0 {
            let delta = br.read_ue();
            next_scale = last_scale.wrapping_add(delta) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
}

/// Broadcast-profile framerate inference from scan mode and picture height.
fn infer_framerate(height: u32, interlaced: bool) -> (u32, u32) {
    if interlaced {
        (25, 1)
    } else if height >= 1080 {
        (25, 1)
    } else if height >= 720 {
        (50, 1)
    } else {
        (25, 1)
    }
}
