//! C support code placed at the top of every generated translation unit.

pub const RUNTIME_PRELUDE: &str = r#"#include <stdbool.h>
#include <stdint.h>
#include <stdio.h>
#include <stdlib.h>
#include <string.h>

typedef uint8_t kl_unit;

typedef struct {
    const char *ptr;
    int64_t len;
} kl_str;

typedef struct {
    int64_t len;
    int64_t cap;
    int64_t elem_size;
    unsigned char *data;
} kl_list_data;

typedef kl_list_data *kl_list;

static _Noreturn void kl_fail(const char *message) {
    fflush(stdout);
    fprintf(stderr, "panic: %s\n", message);
    exit(101);
}

static inline _Noreturn void kl_panic(kl_str message) {
    fflush(stdout);
    fprintf(stderr, "panic: %.*s\n", (int)message.len, message.ptr);
    exit(101);
}

static inline void kl_assert(bool cond) {
    if (!cond) {
        kl_fail("assertion failed");
    }
}

static inline void kl_print_i64(int64_t value) {
    printf("%lld\n", (long long)value);
}

static inline void kl_print_u64(uint64_t value) {
    printf("%llu\n", (unsigned long long)value);
}

static inline void kl_print_bool(bool value) {
    fputs(value ? "true\n" : "false\n", stdout);
}

static inline void kl_print_str(kl_str value) {
    fwrite(value.ptr, 1, (size_t)value.len, stdout);
    fputc('\n', stdout);
}

static inline bool kl_str_eq(kl_str a, kl_str b) {
    return a.len == b.len && (a.len == 0 || memcmp(a.ptr, b.ptr, (size_t)a.len) == 0);
}

static inline kl_str kl_str_concat(kl_str a, kl_str b) {
    int64_t len = a.len + b.len;
    char *buffer = malloc((size_t)len + 1);
    if (!buffer) {
        kl_fail("out of memory");
    }
    memcpy(buffer, a.ptr, (size_t)a.len);
    memcpy(buffer + a.len, b.ptr, (size_t)b.len);
    buffer[len] = '\0';
    return (kl_str){ buffer, len };
}

static inline uint8_t kl_str_byte_at(kl_str s, int64_t index) {
    if (index < 0 || index >= s.len) {
        kl_fail("string index out of bounds");
    }
    return (uint8_t)s.ptr[index];
}

static inline kl_list kl_list_new(int64_t elem_size) {
    kl_list list = malloc(sizeof(kl_list_data));
    if (!list) {
        kl_fail("out of memory");
    }
    list->len = 0;
    list->cap = 0;
    list->elem_size = elem_size;
    list->data = NULL;
    return list;
}

static inline void kl_list_push(kl_list list, const void *elem) {
    if (list->len == list->cap) {
        int64_t cap = list->cap ? list->cap * 2 : 4;
        unsigned char *data = realloc(list->data, (size_t)(cap * list->elem_size));
        if (!data) {
            kl_fail("out of memory");
        }
        list->data = data;
        list->cap = cap;
    }
    memcpy(list->data + list->len * list->elem_size, elem, (size_t)list->elem_size);
    list->len += 1;
}

static inline void *kl_list_at(kl_list list, int64_t index) {
    if (index < 0 || index >= list->len) {
        kl_fail("list index out of bounds");
    }
    return list->data + index * list->elem_size;
}
"#;
