//! Day → topic hint table used to steer lesson generation.

/// Topic hints for the days that have a planned theme.
const TOPICS: &[(u32, &str)] = &[
    (1, "Greetings & Self Introduction (Xin chào & Giới thiệu)"),
    (2, "Numbers 0-20 & Counting (Số đếm cơ bản)"),
    (3, "Family Members (Thành viên gia đình)"),
    (4, "Colors & Shapes (Màu sắc & Hình khối)"),
    (5, "Common Daily Objects (Đồ vật hàng ngày)"),
    (6, "Days of the Week & Time (Thứ ngày & Thời gian)"),
    (7, "Basic Verbs: Eat, Drink, Sleep (Động từ cơ bản)"),
    (8, "Basic Verbs: Go, Come, Buy (Đi lại & Mua sắm)"),
    (9, "Adjectives: Big, Small, Good, Bad (Tính từ cơ bản)"),
    (10, "Review: Forming Simple Sentences (Ôn tập & Câu đơn)"),
    (11, "Morning Routine (Thói quen buổi sáng)"),
    (12, "Meals & Food (Bữa ăn & Đồ ăn)"),
    (13, "Drinks & Ordering (Đồ uống & Gọi món)"),
    (14, "Fruits & Vegetables (Hoa quả & Rau củ)"),
    (15, "At the Supermarket (Tại siêu thị)"),
    (16, "Money & Prices (Tiền tệ & Giá cả)"),
    (17, "Asking Directions (Hỏi đường)"),
    (18, "Transportation: Bus, Taxi (Giao thông)"),
    (19, "House & Furniture (Nhà cửa & Nội thất)"),
    (20, "Kitchen & Cooking (Nhà bếp & Nấu ăn)"),
    (100, "Graduation & Celebration (Tốt nghiệp & Ăn mừng)"),
];

/// Topic hint for a day, with a generic fallback for unplanned days.
pub fn topic_hint(day: u32) -> String {
    TOPICS
        .iter()
        .find(|(d, _)| *d == day)
        .map(|(_, topic)| topic.to_string())
        .unwrap_or_else(|| format!("Topic for Day {}", day))
}

/// Generation prompt for one day of the course.
pub fn lesson_prompt(day: u32, topic_hint: &str) -> String {
    format!(
        "You are an expert Chinese teacher creating a curriculum for Vietnamese students.\n\
         Create a lesson plan for Day {day} of a 100-day challenge.\n\
         \n\
         STRICT TOPIC FOR TODAY: \"{topic}\"\n\
         \n\
         Total Goal: 1000 words in 100 days (10 words/day).\n\
         \n\
         Requirements:\n\
         1. Select exactly 10 DISTINCT vocabulary words strictly related to the topic: \"{topic}\".\n\
         2. IMPORTANT: Do NOT repeat words from previous days (Numbers, Family, Colors).\n\
         3. Provide Pinyin and Vietnamese meaning.\n\
         4. Provide ONE simple example sentence in Chinese (Hanzi), with Pinyin and Vietnamese translation.\n\
         5. Ensure 'hanzi' and 'example_sentence' contain ONLY Chinese characters (no Pinyin or Vietnamese).\n\
         \n\
         Output strictly in JSON.",
        day = day,
        topic = topic_hint,
    )
}
