//! Number to word conversion used by the normalizer

const ONES: [&str; 20] = [
    "", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten", "eleven",
    "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen", "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const ORDINAL_ONES: [&str; 20] = [
    "", "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth",
    "tenth", "eleventh", "twelfth", "thirteenth", "fourteenth", "fifteenth", "sixteenth",
    "seventeenth", "eighteenth", "nineteenth",
];

const ORDINAL_TENS: [&str; 10] = [
    "", "", "twentieth", "thirtieth", "fortieth", "fiftieth", "sixtieth", "seventieth",
    "eightieth", "ninetieth",
];

const DIGITS: [&str; 10] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
];

/// Cardinal reading: 1234 -> "one thousand two hundred thirty four"
pub fn number_to_words(num: u64) -> String {
    if num == 0 {
        return "zero".to_string();
    }
    convert(num)
}

fn convert(n: u64) -> String {
    match n {
        0..=19 => ONES[n as usize].to_string(),
        20..=99 => {
            let tens = TENS[(n / 10) as usize];
            match n % 10 {
                0 => tens.to_string(),
                ones => format!("{} {}", tens, ONES[ones as usize]),
            }
        }
        100..=999 => scaled(n, 100, "hundred"),
        1_000..=999_999 => scaled(n, 1_000, "thousand"),
        1_000_000..=999_999_999 => scaled(n, 1_000_000, "million"),
        _ => scaled(n, 1_000_000_000, "billion"),
    }
}

fn scaled(n: u64, unit: u64, word: &str) -> String {
    let head = convert(n / unit);
    match n % unit {
        0 => format!("{} {}", head, word),
        rest => format!("{} {} {}", head, word, convert(rest)),
    }
}

/// Year-style reading for integers in 1001..=2999.
///
/// 1984 -> "nineteen eighty four", 1905 -> "nineteen oh five",
/// 1900 -> "nineteen hundred", 2005 -> "two thousand five".
pub fn year_to_words(num: u64) -> String {
    match num {
        2000 => "two thousand".to_string(),
        2001..=2009 => format!("two thousand {}", number_to_words(num % 100)),
        _ if num % 100 == 0 => format!("{} hundred", number_to_words(num / 100)),
        _ => {
            let high = convert(num / 100);
            let low = num % 100;
            if low < 10 {
                format!("{} oh {}", high, ONES[low as usize])
            } else {
                format!("{} {}", high, convert(low))
            }
        }
    }
}

/// Whether an integer is read as a year rather than a cardinal.
pub fn is_year_like(num: u64) -> bool {
    num > 1000 && num < 3000
}

pub fn ordinal_to_words(num: u64) -> String {
    if num < 20 {
        let word = ORDINAL_ONES[num as usize];
        if word.is_empty() {
            return format!("{}th", number_to_words(num));
        }
        return word.to_string();
    }
    if num < 100 {
        let tens = (num / 10) as usize;
        return match num % 10 {
            0 => ORDINAL_TENS[tens].to_string(),
            ones => format!("{} {}", TENS[tens], ORDINAL_ONES[ones as usize]),
        };
    }

    let cardinal = number_to_words(num);
    if let Some(stem) = cardinal.strip_suffix('y') {
        format!("{}ieth", stem)
    } else if let Some(stem) = cardinal.strip_suffix("one") {
        format!("{}first", stem)
    } else if let Some(stem) = cardinal.strip_suffix("two") {
        format!("{}second", stem)
    } else if let Some(stem) = cardinal.strip_suffix("three") {
        format!("{}third", stem)
    } else if let Some(stem) = cardinal.strip_suffix("ve") {
        format!("{}fth", stem)
    } else if let Some(stem) = cardinal.strip_suffix('e') {
        format!("{}th", stem)
    } else if cardinal.ends_with('t') {
        format!("{}h", cardinal)
    } else {
        format!("{}th", cardinal)
    }
}

/// Read a digit string one digit at a time: "099" -> "zero nine nine"
pub fn digits_to_words(digits: &str) -> String {
    digits
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| DIGITS[d as usize])
        .collect::<Vec<_>>()
        .join(" ")
}
