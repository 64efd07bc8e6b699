use crate::error::{Error, Result};

// run-length coding over bytes: a positive count byte repeats the
// following byte `count + 1` times, a negative count byte is followed
// by `-count` literal bytes

const MIN_RUN_LENGTH: usize = 3;
const MAX_RUN_LENGTH: usize = 127;

pub fn decompress_bytes(compressed: &[u8], expected_byte_size: usize) -> Result<Vec<u8>> {
    let mut remaining = compressed;
    let mut decompressed = Vec::with_capacity(expected_byte_size);

    while !remaining.is_empty() && decompressed.len() != expected_byte_size {
        let count = take_1(&mut remaining)? as i8 as i32;

        if count < 0 {
            // take the next '-count' bytes as-is
            let values = take_n(&mut remaining, (-count) as usize)?;
            decompressed.extend_from_slice(values);
        } else {
            // repeat the next value 'count + 1' times
            let value = take_1(&mut remaining)?;
            decompressed.resize(decompressed.len() + count as usize + 1, value);
        }
    }

    Ok(decompressed)
}

pub fn compress_bytes(raw: &[u8]) -> Vec<u8> {
    let mut compressed = Vec::with_capacity(raw.len());
    let mut run_start = 0;
    let mut run_end = 1;

    while run_start < raw.len() {
        while run_end < raw.len()
            && raw[run_start] == raw[run_end]
            && (run_end - run_start) as i32 - 1 < MAX_RUN_LENGTH as i32
        {
            run_end += 1;
        }

        if run_end - run_start >= MIN_RUN_LENGTH {
            compressed.push(((run_end - run_start) as i32 - 1) as u8);
            compressed.push(raw[run_start]);
            run_start = run_end;
        } else {
            while run_end < raw.len()
                && ((run_end + 1 >= raw.len() || raw[run_end] != raw[run_end + 1])
                    || (run_end + 2 >= raw.len() || raw[run_end + 1] != raw[run_end + 2]))
                && run_end - run_start < MAX_RUN_LENGTH
            {
                run_end += 1;
            }

            compressed.push((run_start as i32 - run_end as i32) as u8);
            compressed.extend_from_slice(&raw[run_start..run_end]);

            run_start = run_end;
            run_end += 1;
        }
    }

    compressed
}

fn take_1(slice: &mut &[u8]) -> Result<u8> {
    if let Some((&first, rest)) = slice.split_first() {
        *slice = rest;
        Ok(first)
    } else {
        Err(Error::DecompressionFailed)
    }
}

fn take_n<'s>(slice: &mut &'s [u8], n: usize) -> Result<&'s [u8]> {
    if n <= slice.len() {
        let (front, back) = slice.split_at(n);
        *slice = back;
        Ok(front)
    } else {
        Err(Error::DecompressionFailed)
    }
}
